//! 会话 Cookie 编解码的性质测试。

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use snippetbox::SessionManager;

const SECRET: &[u8] = b"sI3WqH$@Hg!DsCX*^TyHGf@!#xXcBNK%";

fn manager() -> SessionManager {
    SessionManager::new(SECRET)
}

proptest! {
    #[test]
    fn arbitrary_cookie_degrades_to_fresh_session(cookie in ".{0,256}") {
        let now = Utc::now();
        let session = manager().load_at(Some(&cookie), now);
        prop_assert!(session.is_new());
        prop_assert!(session.is_empty());
    }

    #[test]
    fn base64_garbage_degrades_to_fresh_session(cookie in "[A-Za-z0-9_-]{0,400}") {
        let now = Utc::now();
        let session = manager().load_at(Some(&cookie), now);
        prop_assert!(session.is_new());
        prop_assert!(session.is_empty());
    }

    #[test]
    fn values_survive_encode_and_decode(
        key in "[a-z_]{1,16}",
        text in ".{0,64}",
        number in any::<i64>(),
    ) {
        let sessions = manager();
        let now = Utc::now();
        let mut session = sessions.create(now);
        session.put(&key, text.clone());
        session.put("number", number);

        let cookie = sessions.encode(&session).unwrap();
        let mut loaded = sessions.load_at(Some(&cookie), now);
        prop_assert!(!loaded.is_new());
        prop_assert_eq!(loaded.id(), session.id());
        prop_assert_eq!(loaded.get_i64("number"), Some(number));
        if key != "number" {
            prop_assert_eq!(loaded.get_str(&key), Some(text.as_str()));
            prop_assert!(loaded.exists(&key));
            loaded.remove(&key);
            prop_assert!(!loaded.exists(&key));
            prop_assert!(loaded.get(&key).is_none());
            prop_assert!(loaded.is_modified());
        }
    }

    #[test]
    fn token_is_stable_within_a_session(key in "[a-z]{1,8}", value in any::<u32>()) {
        let sessions = manager();
        let now = Utc::now();
        let mut session = sessions.create(now);
        let before = sessions.token(&session);

        session.put(&key, value);
        let cookie = sessions.encode(&session).unwrap();
        let loaded = sessions.load_at(Some(&cookie), now);

        prop_assert_eq!(sessions.token(&loaded), before.clone());
        prop_assert!(sessions.verify_token(&loaded, &before));
    }

    #[test]
    fn expired_cookie_degrades_to_fresh_session(hours_late in 0i64..10_000) {
        let sessions = manager().with_lifetime(Duration::hours(12));
        let issued = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let mut session = sessions.create(issued);
        session.put("flash", "hello");
        let cookie = sessions.encode(&session).unwrap();

        let later = issued + Duration::hours(12) + Duration::hours(hours_late);
        let loaded = sessions.load_at(Some(&cookie), later);
        prop_assert!(loaded.is_new());
        prop_assert!(loaded.is_empty());
        prop_assert_ne!(loaded.id(), session.id());
    }
}

#[test]
fn tokens_differ_between_sessions() {
    let sessions = manager();
    let now = Utc::now();
    let a = sessions.create(now);
    let b = sessions.create(now);
    assert_ne!(a.id(), b.id());
    assert_ne!(sessions.token(&a), sessions.token(&b));
    assert!(!sessions.verify_token(&b, &sessions.token(&a)));
}

#[test]
fn flash_is_read_exactly_once_across_requests() {
    let sessions = manager();
    let now = Utc::now();
    let mut session = sessions.create(now);
    session.put("flash", "Snippet successfully created!");

    // 第一次请求取出闪现消息，并写回 Cookie
    let cookie = sessions.encode(&session).unwrap();
    let mut first = sessions.load_at(Some(&cookie), now);
    assert_eq!(
        first.pop_string("flash").as_deref(),
        Some("Snippet successfully created!")
    );
    assert!(first.should_save());

    // 第二次请求已经看不到它
    let cookie = sessions.encode(&first).unwrap();
    let mut second = sessions.load_at(Some(&cookie), now);
    assert_eq!(second.pop_string("flash"), None);
    assert!(!second.should_save());
}

#[test]
fn cookie_from_another_secret_is_rejected() {
    let now = Utc::now();
    let mut session = manager().create(now);
    session.put("authenticated_user_id", 7);
    let cookie = manager().encode(&session).unwrap();

    let other = SessionManager::new(b"a completely different secret!!!");
    let loaded = other.load_at(Some(&cookie), now);
    assert!(loaded.is_new());
    assert_eq!(loaded.get_i64("authenticated_user_id"), None);
}
