use lessondeck_core::db::open_db_in_memory;
use lessondeck_core::model::deck::NoteType;
use lessondeck_core::repo::deck_repo::ItemKind;
use lessondeck_core::{
    Comment, DeckRepository, DeckSnapshot, Note, Reaction, RepoError, RepoResult, SkipReason,
    Slide, SqliteDeckRepository, SqliteLessonDirectory, SqliteUserDirectory, UserDirectory,
    UserRecord, UserRef,
};
use rusqlite::Connection;
use std::collections::HashSet;
use std::time::Duration;

fn seeded_conn() -> Connection {
    let conn = open_db_in_memory().unwrap();
    let users = SqliteUserDirectory::new(&conn);
    for (id, name) in [("U1", "Ada"), ("U2", "Grace")] {
        users
            .upsert_user(&UserRecord {
                id: id.to_string(),
                name: name.to_string(),
                image: None,
            })
            .unwrap();
    }
    SqliteLessonDirectory::new(&conn)
        .upsert_lesson("L1", "Cells", Some("https://cdn.example/cells.pdf"))
        .unwrap();
    conn
}

fn slide_with_thread(id: &str, title: &str) -> Slide {
    let mut comment = Comment::new("Great point", UserRef::new("U1"));
    comment.id = format!("{id}-c1");
    let mut reaction = Reaction::new("🔥", UserRef::new("U2"));
    reaction.id = format!("{id}-r1");
    comment.reactions.push(reaction);

    let mut slide = Slide::new(title);
    slide.id = id.to_string();
    slide.notes.push(Note::text("seeded from highlight"));
    slide.comments.push(comment);
    slide
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| row.get(0))
        .unwrap()
}

#[test]
fn replace_then_load_returns_the_same_tree() {
    let mut conn = seeded_conn();
    let mut repo = SqliteDeckRepository::try_new(&mut conn).unwrap();
    let mut slide = slide_with_thread("s1", "Mitochondria");
    slide
        .notes
        .push(Note::media(NoteType::Image, "diagram", "https://cdn.example/m.png"));

    let outcome = repo
        .replace_deck(&DeckSnapshot::new("L1", vec![slide, Slide::new("Second")]))
        .unwrap();
    assert_eq!(outcome.success_count, 2);
    assert!(outcome.skipped.is_empty());
    assert_eq!(outcome.slide_ids[0], "s1");

    let loaded = repo.load_deck("L1").unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].title, "Mitochondria");
    assert_eq!(loaded[1].title, "Second");

    let notes = &loaded[0].notes;
    assert_eq!(notes.len(), 2);
    assert_eq!(notes[0].order, Some(0));
    assert_eq!(notes[1].kind, NoteType::Image);
    assert_eq!(notes[1].source.as_deref(), Some("https://cdn.example/m.png"));

    let comment = &loaded[0].comments[0];
    assert_eq!(comment.id, "s1-c1");
    assert_eq!(comment.sender.name.as_deref(), Some("Ada"));
    assert_eq!(comment.reactions[0].emoji, "🔥");
    assert_eq!(comment.reactions[0].user.name.as_deref(), Some("Grace"));
}

#[test]
fn replacing_twice_with_the_same_snapshot_is_idempotent() {
    let mut conn = seeded_conn();
    let snapshot = DeckSnapshot::new("L1", vec![slide_with_thread("s1", "One")]);

    let first = {
        let mut repo = SqliteDeckRepository::try_new(&mut conn).unwrap();
        repo.replace_deck(&snapshot).unwrap();
        repo.load_deck("L1").unwrap()
    };
    let counts_after_first: Vec<i64> = ["slides", "slide_notes", "slide_comments", "comment_reactions"]
        .iter()
        .map(|table| count(&conn, table))
        .collect();

    let mut repo = SqliteDeckRepository::try_new(&mut conn).unwrap();
    let second_outcome = repo.replace_deck(&snapshot).unwrap();
    let second = repo.load_deck("L1").unwrap();
    drop(repo);

    assert_eq!(first, second);
    assert_eq!(second_outcome.replaced_count, 1);
    let counts_after_second: Vec<i64> = ["slides", "slide_notes", "slide_comments", "comment_reactions"]
        .iter()
        .map(|table| count(&conn, table))
        .collect();
    assert_eq!(counts_after_first, counts_after_second);
    assert_eq!(counts_after_second, vec![1, 1, 1, 1]);
}

#[test]
fn invalid_items_are_skipped_without_aborting_the_batch() {
    let mut conn = seeded_conn();
    let mut repo = SqliteDeckRepository::try_new(&mut conn).unwrap();

    let mut valid = slide_with_thread("s2", "Valid");
    valid.notes.insert(0, Note::text("   "));
    valid
        .comments
        .push(Comment::new("", UserRef::new("U1")));
    valid
        .comments
        .push(Comment::new("no sender", UserRef::new(" ")));
    valid.comments[0]
        .reactions
        .push(Reaction::new("", UserRef::new("U1")));

    let snapshot = DeckSnapshot::new("L1", vec![Slide::new("  "), valid]);
    let outcome = repo.replace_deck(&snapshot).unwrap();

    assert_eq!(outcome.success_count, 1);
    let skipped: Vec<(ItemKind, &str, &SkipReason)> = outcome
        .skipped
        .iter()
        .map(|item| (item.kind, item.path.as_str(), &item.reason))
        .collect();
    assert_eq!(
        skipped,
        vec![
            (ItemKind::Slide, "slides[0]", &SkipReason::MissingTitle),
            (ItemKind::Note, "slides[1].notes[0]", &SkipReason::MissingContent),
            (
                ItemKind::Reaction,
                "slides[1].comments[0].reactions[1]",
                &SkipReason::MissingEmoji
            ),
            (ItemKind::Comment, "slides[1].comments[1]", &SkipReason::MissingContent),
            (ItemKind::Comment, "slides[1].comments[2]", &SkipReason::MissingSender),
        ]
    );

    let loaded = repo.load_deck("L1").unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].comments.len(), 1);
    assert_eq!(loaded[0].comments[0].reactions.len(), 1);
}

#[test]
fn note_order_is_dense_over_accepted_notes() {
    let mut conn = seeded_conn();
    let mut repo = SqliteDeckRepository::try_new(&mut conn).unwrap();

    let mut slide = Slide::new("Ordered");
    let mut first = Note::text("first");
    first.order = Some(42);
    slide.notes = vec![first, Note::text(""), Note::text("second")];
    repo.replace_deck(&DeckSnapshot::new("L1", vec![slide]))
        .unwrap();

    let notes = &repo.load_deck("L1").unwrap()[0].notes;
    let orders: Vec<(String, Option<u32>)> = notes
        .iter()
        .map(|note| (note.content.clone(), note.order))
        .collect();
    assert_eq!(
        orders,
        vec![
            ("first".to_string(), Some(0)),
            ("second".to_string(), Some(1))
        ]
    );
}

#[test]
fn unresolved_users_are_skipped_and_the_rest_is_saved() {
    let mut conn = seeded_conn();
    let mut slide = slide_with_thread("s1", "Thread");
    slide
        .comments
        .push(Comment::new("from a deleted account", UserRef::new("U9")));
    slide.comments[0]
        .reactions
        .push(Reaction::new("👍", UserRef::new("U404")));

    let mut repo = SqliteDeckRepository::try_new(&mut conn).unwrap();
    let outcome = repo
        .replace_deck(&DeckSnapshot::new("L1", vec![slide]))
        .unwrap();

    let reasons: Vec<&SkipReason> = outcome.skipped.iter().map(|item| &item.reason).collect();
    assert_eq!(
        reasons,
        vec![
            &SkipReason::UnknownUser("U404".to_string()),
            &SkipReason::UnknownSender("U9".to_string()),
        ]
    );

    let loaded = repo.load_deck("L1").unwrap();
    assert_eq!(loaded[0].comments.len(), 1);
    assert_eq!(loaded[0].comments[0].reactions.len(), 1);
    assert_eq!(loaded[0].comments[0].reactions[0].user.id, "U2");
}

#[test]
fn user_removed_between_saves_drops_their_comment_on_next_save() {
    let mut conn = seeded_conn();
    let snapshot = DeckSnapshot::new("L1", vec![slide_with_thread("s1", "Thread")]);
    {
        let mut repo = SqliteDeckRepository::try_new(&mut conn).unwrap();
        repo.replace_deck(&snapshot).unwrap();
    }
    assert!(SqliteUserDirectory::new(&conn).remove_user("U1").unwrap());

    let mut repo = SqliteDeckRepository::try_new(&mut conn).unwrap();
    let outcome = repo.replace_deck(&snapshot).unwrap();
    assert_eq!(outcome.success_count, 1);
    assert_eq!(
        outcome.skipped[0].reason,
        SkipReason::UnknownSender("U1".to_string())
    );
    assert!(repo.load_deck("L1").unwrap()[0].comments.is_empty());
}

#[test]
fn duplicate_slide_ids_keep_the_first_occurrence() {
    let mut conn = seeded_conn();
    let mut repo = SqliteDeckRepository::try_new(&mut conn).unwrap();

    let mut duplicate = Slide::new("Copy");
    duplicate.id = "s1".to_string();
    let outcome = repo
        .replace_deck(&DeckSnapshot::new(
            "L1",
            vec![slide_with_thread("s1", "Original"), duplicate],
        ))
        .unwrap();

    assert_eq!(outcome.success_count, 1);
    assert_eq!(
        outcome.skipped[0].reason,
        SkipReason::DuplicateId("s1".to_string())
    );
    assert_eq!(repo.load_deck("L1").unwrap()[0].title, "Original");
}

#[test]
fn missing_lesson_fails_before_any_write() {
    let mut conn = seeded_conn();
    let mut repo = SqliteDeckRepository::try_new(&mut conn).unwrap();
    repo.replace_deck(&DeckSnapshot::new("L1", vec![slide_with_thread("s1", "Kept")]))
        .unwrap();

    let err = repo
        .replace_deck(&DeckSnapshot::new("L-missing", vec![Slide::new("Lost")]))
        .unwrap_err();
    assert!(matches!(err, RepoError::LessonNotFound(id) if id == "L-missing"));
    drop(repo);

    assert_eq!(count(&conn, "slides"), 1);
}

#[test]
fn exceeded_deadline_rolls_back_the_whole_replace() {
    let mut conn = seeded_conn();
    {
        let mut repo = SqliteDeckRepository::try_new(&mut conn).unwrap();
        repo.replace_deck(&DeckSnapshot::new("L1", vec![slide_with_thread("s1", "Before")]))
            .unwrap();
    }

    let mut repo = SqliteDeckRepository::try_new(&mut conn)
        .unwrap()
        .with_timeout(Duration::ZERO);
    let err = repo
        .replace_deck(&DeckSnapshot::new("L1", vec![Slide::new("After")]))
        .unwrap_err();
    assert!(matches!(err, RepoError::Timeout { limit_ms: 0, .. }));

    let loaded = repo.load_deck("L1").unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].title, "Before");
    assert_eq!(loaded[0].comments.len(), 1);
}

struct AllowList(HashSet<&'static str>);

impl UserDirectory for AllowList {
    fn find_user(&self, user_id: &str) -> RepoResult<Option<UserRecord>> {
        Ok(self.0.contains(user_id).then(|| UserRecord {
            id: user_id.to_string(),
            name: user_id.to_string(),
            image: None,
        }))
    }
}

#[test]
fn replace_can_resolve_users_through_an_external_directory() {
    let mut conn = seeded_conn();
    let mut repo = SqliteDeckRepository::try_new(&mut conn).unwrap();
    let directory = AllowList(HashSet::from(["U2"]));

    let outcome = repo
        .replace_deck_with(
            &DeckSnapshot::new("L1", vec![slide_with_thread("s1", "External")]),
            &directory,
        )
        .unwrap();

    // U1 (comment sender) is unknown to the external directory.
    assert_eq!(
        outcome.skipped[0].reason,
        SkipReason::UnknownSender("U1".to_string())
    );
    assert!(repo.load_deck("L1").unwrap()[0].comments.is_empty());
}

#[test]
fn repository_requires_a_migrated_connection() {
    let mut conn = Connection::open_in_memory().unwrap();
    let err = SqliteDeckRepository::try_new(&mut conn).err().unwrap();
    assert!(matches!(
        err,
        RepoError::UninitializedConnection {
            actual_version: 0,
            ..
        }
    ));
}
