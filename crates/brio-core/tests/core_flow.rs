use brio_core::audio;
use brio_core::datastore::DataStore;
use tempfile::tempdir;

#[test]
fn datastore_roundtrip_and_legacy_normalization() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");

    // a modern record, a legacy bare string, and a partial object
    std::fs::write(
        &store.tasks_path,
        concat!(
            r#"{"id":1700000000001,"text":"ship release","done":false,"due":"2026-09-01T08:00:00Z","group":"work","alarm_offset":15}"#,
            "\n",
            r#""buy milk""#,
            "\n",
            r#"{"text":"call dentist","done":true}"#,
            "\n",
        ),
    )
    .expect("seed tasks");

    let tasks = store.load_tasks().expect("load tasks");
    assert_eq!(tasks.len(), 3);

    assert_eq!(tasks[0].id, 1_700_000_000_001);
    assert_eq!(tasks[0].group, "work");
    assert_eq!(tasks[0].alarm_offset, 15);
    assert!(tasks[0].due.is_some());

    assert_eq!(tasks[1].text, "buy milk");
    assert_eq!(tasks[1].group, "inbox");
    assert_eq!(tasks[1].due, None);

    assert!(tasks[2].done);
    assert_ne!(tasks[1].id, tasks[2].id, "assigned ids must be unique");

    store.save_tasks(&tasks).expect("save tasks");
    let reloaded = store.load_tasks().expect("reload tasks");
    assert_eq!(reloaded, tasks);
}

#[test]
fn groups_default_until_saved_and_inbox_is_sticky() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");

    let groups = store.load_groups().expect("load groups");
    assert_eq!(groups, ["inbox", "work", "personal", "shopping"]);

    store
        .save_groups(&["home".to_string()])
        .expect("save groups");
    assert_eq!(store.load_groups().expect("reload groups"), ["inbox", "home"]);
}

#[test]
fn oversized_sound_is_rejected_before_any_write() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");

    let sound_file = temp.path().join("big.wav");
    std::fs::write(&sound_file, vec![0u8; 3 * 1024 * 1024]).expect("write 3 MiB file");

    let result = audio::load_sound_file(&sound_file);
    assert!(result.is_err(), "3 MiB is over the 2 MiB ceiling");

    assert_eq!(
        store.load_custom_sound().expect("load sound"),
        None,
        "rejection must not leave partial state behind"
    );
}

#[test]
fn custom_sound_roundtrip_and_reset() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");

    let sound_file = temp.path().join("ding.wav");
    std::fs::write(&sound_file, b"RIFF fake wave bytes").expect("write sound file");

    let reference = audio::load_sound_file(&sound_file).expect("load sound file");
    assert!(reference.starts_with("data:audio/wav;base64,"));

    store.save_custom_sound(&reference).expect("save sound");
    assert_eq!(
        store.load_custom_sound().expect("reload sound"),
        Some(reference)
    );

    store.clear_custom_sound().expect("clear sound");
    assert_eq!(store.load_custom_sound().expect("reload sound"), None);
    store.clear_custom_sound().expect("clearing twice is fine");
}
