use super::testing::MemoryBackend;
use super::*;

#[test]
fn read_after_write_returns_written_values() {
    let mut prefs = Preferences::new(MemoryBackend::new());

    let mut session = prefs.open(Namespace::Server, AccessMode::ReadWrite).unwrap();
    session.put_str("ws_ip", "192.168.1.50").unwrap();
    session.put_u32("ws_port", 8000).unwrap();
    session.end().unwrap();

    let session = prefs.open(Namespace::Server, AccessMode::ReadOnly).unwrap();
    assert_eq!(session.get_str("ws_ip"), Some("192.168.1.50"));
    assert_eq!(session.get_u32("ws_port"), Some(8000));
    assert_eq!(session.get_u32("ws_ip"), None);
}

#[test]
fn namespaces_are_independent() {
    let mut prefs = Preferences::new(MemoryBackend::new());

    let mut auth = prefs.open(Namespace::Auth, AccessMode::ReadWrite).unwrap();
    auth.put_str("auth_token", "token-1").unwrap();
    auth.end().unwrap();

    prefs.clear(Namespace::Server).unwrap();

    let auth = prefs.open(Namespace::Auth, AccessMode::ReadOnly).unwrap();
    assert_eq!(auth.get_str("auth_token"), Some("token-1"));
    let server = prefs.open(Namespace::Server, AccessMode::ReadOnly).unwrap();
    assert!(!server.contains("ws_ip"));
}

#[test]
fn unchanged_session_does_not_write() {
    let mut prefs = Preferences::new(MemoryBackend::new());

    for _ in 0..2 {
        let mut session = prefs.open(Namespace::Server, AccessMode::ReadWrite).unwrap();
        session.put_str("ws_ip", "10.0.0.9").unwrap();
        session.put_u32("ws_port", 8000).unwrap();
        session.end().unwrap();
    }

    assert_eq!(prefs.backend_mut().writes, 1);
}

#[test]
fn read_only_session_rejects_writes() {
    let mut prefs = Preferences::new(MemoryBackend::new());
    let mut session = prefs.open(Namespace::Auth, AccessMode::ReadOnly).unwrap();

    assert_eq!(
        session.put_str("auth_token", "x"),
        Err(PreferencesError::ReadOnly)
    );
    assert_eq!(session.remove("auth_token"), Err(PreferencesError::ReadOnly));
}

#[test]
fn removing_every_key_erases_the_slot() {
    let mut prefs = Preferences::new(MemoryBackend::new());

    let mut session = prefs.open(Namespace::Server, AccessMode::ReadWrite).unwrap();
    session.put_str("ws_ip", "10.0.0.9").unwrap();
    session.end().unwrap();

    let mut session = prefs.open(Namespace::Server, AccessMode::ReadWrite).unwrap();
    assert_eq!(session.remove("ws_ip"), Ok(true));
    assert_eq!(session.remove("ws_port"), Ok(false));
    session.end().unwrap();

    assert!(prefs.backend_mut().raw(Namespace::Server).is_none());
}

#[test]
fn dropped_session_discards_changes() {
    let mut prefs = Preferences::new(MemoryBackend::new());

    {
        let mut session = prefs.open(Namespace::Auth, AccessMode::ReadWrite).unwrap();
        session.put_str("auth_token", "never-committed").unwrap();
    }

    let session = prefs.open(Namespace::Auth, AccessMode::ReadOnly).unwrap();
    assert_eq!(session.get_str("auth_token"), None);
}

#[test]
fn corrupt_record_opens_empty_and_is_replaced() {
    let mut prefs = Preferences::new(MemoryBackend::new());

    let mut session = prefs.open(Namespace::Server, AccessMode::ReadWrite).unwrap();
    session.put_str("ws_ip", "10.0.0.9").unwrap();
    session.end().unwrap();
    prefs.backend_mut().corrupt(Namespace::Server, 12);

    let mut session = prefs.open(Namespace::Server, AccessMode::ReadWrite).unwrap();
    assert_eq!(session.get_str("ws_ip"), None);
    session.put_str("ws_ip", "10.0.0.10").unwrap();
    session.end().unwrap();

    let session = prefs.open(Namespace::Server, AccessMode::ReadOnly).unwrap();
    assert_eq!(session.get_str("ws_ip"), Some("10.0.0.10"));
}

#[test]
fn backend_failures_surface_on_commit() {
    let mut prefs = Preferences::new(MemoryBackend::new());
    prefs.backend_mut().fail_writes = true;

    let mut session = prefs.open(Namespace::Auth, AccessMode::ReadWrite).unwrap();
    session.put_str("auth_token", "x").unwrap();
    assert!(matches!(session.end(), Err(PreferencesError::Backend(_))));
}
