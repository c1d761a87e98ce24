//! Deck repository contracts and SQLite bulk-replace implementation.
//!
//! # Responsibility
//! - Load the stored deck of a lesson as an ordered slide tree.
//! - Replace the whole deck from a snapshot in one bounded transaction.
//!
//! # Invariants
//! - A missing lesson fails the whole call before any write.
//! - Invalid or unresolvable nested items are skipped and logged; they never
//!   abort the enclosing transaction.
//! - Note order is recomputed from array position; client `order` values are
//!   ignored.
//! - Transaction-level failures (deadline, storage) roll back everything.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::deck::{
    new_item_id, Comment, DeckSnapshot, LessonId, Note, NoteType, Reaction, Slide, SlideId,
    UserRef,
};
use crate::repo::directory_repo::{SqliteUserDirectory, UserDirectory};
use log::{info, warn};
use rusqlite::{params, Connection, Params, Transaction, TransactionBehavior};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

/// Default bound for one bulk-replace transaction.
pub const DEFAULT_REPLACE_TIMEOUT: Duration = Duration::from_secs(15);

pub type RepoResult<T> = Result<T, RepoError>;

/// Transaction-level repository error. Item-level problems are reported as
/// [`SkippedItem`] instead.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    LessonNotFound(LessonId),
    Timeout { elapsed_ms: u128, limit_ms: u128 },
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::LessonNotFound(id) => write!(f, "lesson not found: {id}"),
            Self::Timeout {
                elapsed_ms,
                limit_ms,
            } => write!(
                f,
                "deck transaction exceeded {limit_ms}ms (elapsed {elapsed_ms}ms)"
            ),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "deck repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted deck data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Kind of nested record dropped during a replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Slide,
    Note,
    Comment,
    Reaction,
}

impl ItemKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Slide => "slide",
            Self::Note => "note",
            Self::Comment => "comment",
            Self::Reaction => "reaction",
        }
    }
}

/// Why a nested record was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingTitle,
    MissingContent,
    MissingSender,
    UnknownSender(String),
    MissingEmoji,
    MissingUser,
    UnknownUser(String),
    /// Same id appeared twice under one parent.
    DuplicateId(String),
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingTitle => write!(f, "missing_title"),
            Self::MissingContent => write!(f, "missing_content"),
            Self::MissingSender => write!(f, "missing_sender"),
            Self::UnknownSender(id) => write!(f, "unknown_sender:{id}"),
            Self::MissingEmoji => write!(f, "missing_emoji"),
            Self::MissingUser => write!(f, "missing_user"),
            Self::UnknownUser(id) => write!(f, "unknown_user:{id}"),
            Self::DuplicateId(id) => write!(f, "duplicate_id:{id}"),
        }
    }
}

/// One dropped record, addressed by its position in the input snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedItem {
    pub kind: ItemKind,
    /// Input path, e.g. `slides[0].comments[2]`.
    pub path: String,
    pub reason: SkipReason,
}

/// Result of a committed bulk replace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceOutcome {
    /// Number of slides created.
    pub success_count: usize,
    /// Ids of created slides in deck order.
    pub slide_ids: Vec<SlideId>,
    /// Number of slides removed before recreation.
    pub replaced_count: usize,
    pub skipped: Vec<SkippedItem>,
}

/// Repository interface for deck persistence.
pub trait DeckRepository {
    /// Loads the stored deck; empty when the lesson has no slides.
    fn load_deck(&self, lesson_id: &str) -> RepoResult<Vec<Slide>>;
    /// Atomically replaces all stored slides of the snapshot's lesson.
    fn replace_deck(&mut self, snapshot: &DeckSnapshot) -> RepoResult<ReplaceOutcome>;
}

/// SQLite-backed deck repository.
pub struct SqliteDeckRepository<'conn> {
    conn: &'conn mut Connection,
    timeout: Duration,
}

impl<'conn> SqliteDeckRepository<'conn> {
    /// Constructs a repository from a migrated connection.
    pub fn try_new(conn: &'conn mut Connection) -> RepoResult<Self> {
        ensure_deck_connection_ready(conn)?;
        Ok(Self {
            conn,
            timeout: DEFAULT_REPLACE_TIMEOUT,
        })
    }

    /// Overrides the transaction deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replaces the deck resolving users through an external directory.
    pub fn replace_deck_with(
        &mut self,
        snapshot: &DeckSnapshot,
        directory: &dyn UserDirectory,
    ) -> RepoResult<ReplaceOutcome> {
        let started_at = Instant::now();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = replace_in_tx(&tx, snapshot, directory, started_at, self.timeout);
        finish_replace(tx, snapshot, outcome, started_at, self.timeout)
    }
}

impl DeckRepository for SqliteDeckRepository<'_> {
    fn load_deck(&self, lesson_id: &str) -> RepoResult<Vec<Slide>> {
        load_slides(self.conn, lesson_id)
    }

    fn replace_deck(&mut self, snapshot: &DeckSnapshot) -> RepoResult<ReplaceOutcome> {
        let started_at = Instant::now();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = {
            let directory = SqliteUserDirectory::new(&tx);
            replace_in_tx(&tx, snapshot, &directory, started_at, self.timeout)
        };
        finish_replace(tx, snapshot, outcome, started_at, self.timeout)
    }
}

fn finish_replace(
    tx: Transaction<'_>,
    snapshot: &DeckSnapshot,
    outcome: RepoResult<ReplaceOutcome>,
    started_at: Instant,
    timeout: Duration,
) -> RepoResult<ReplaceOutcome> {
    let committed = outcome.and_then(|outcome| {
        check_deadline(started_at, timeout)?;
        tx.commit()?;
        Ok(outcome)
    });

    match &committed {
        Ok(outcome) => info!(
            "event=deck_replace module=repo status=ok lesson_id={} input={} created={} replaced={} skipped={} duration_ms={}",
            snapshot.lesson_id,
            snapshot.slides.len(),
            outcome.success_count,
            outcome.replaced_count,
            outcome.skipped.len(),
            started_at.elapsed().as_millis()
        ),
        // Dropping an uncommitted transaction rolls it back.
        Err(err) => warn!(
            "event=deck_replace module=repo status=error lesson_id={} duration_ms={} error={}",
            snapshot.lesson_id,
            started_at.elapsed().as_millis(),
            err
        ),
    }
    committed
}

/// Memoized user resolution for one replace call.
struct UserResolver<'a> {
    directory: &'a dyn UserDirectory,
    known: HashMap<String, bool>,
}

impl<'a> UserResolver<'a> {
    fn new(directory: &'a dyn UserDirectory) -> Self {
        Self {
            directory,
            known: HashMap::new(),
        }
    }

    fn resolves(&mut self, user_id: &str) -> RepoResult<bool> {
        if let Some(found) = self.known.get(user_id) {
            return Ok(*found);
        }
        let found = self.directory.find_user(user_id)?.is_some();
        self.known.insert(user_id.to_string(), found);
        Ok(found)
    }
}

fn replace_in_tx(
    tx: &Transaction<'_>,
    snapshot: &DeckSnapshot,
    directory: &dyn UserDirectory,
    started_at: Instant,
    timeout: Duration,
) -> RepoResult<ReplaceOutcome> {
    let lesson_id = snapshot.lesson_id.as_str();
    if !lesson_exists(tx, lesson_id)? {
        return Err(RepoError::LessonNotFound(snapshot.lesson_id.clone()));
    }

    let replaced_count = tx.execute("DELETE FROM slides WHERE lesson_id = ?1;", [lesson_id])?;
    let mut outcome = ReplaceOutcome {
        replaced_count,
        ..ReplaceOutcome::default()
    };
    let mut users = UserResolver::new(directory);

    for (slide_index, slide) in snapshot.slides.iter().enumerate() {
        check_deadline(started_at, timeout)?;
        let path = format!("slides[{slide_index}]");

        let title = slide.title.trim();
        if title.is_empty() {
            skip(&mut outcome, lesson_id, ItemKind::Slide, path, SkipReason::MissingTitle);
            continue;
        }

        let slide_uuid = id_or_new(&slide.id);
        let position = outcome.success_count as i64;
        let inserted = insert_row(
            tx,
            "INSERT INTO slides (slide_uuid, lesson_id, title, position)
             VALUES (?1, ?2, ?3, ?4);",
            params![slide_uuid, lesson_id, title, position],
        )?;
        let Some(slide_row_id) = inserted else {
            skip(
                &mut outcome,
                lesson_id,
                ItemKind::Slide,
                path,
                SkipReason::DuplicateId(slide_uuid),
            );
            continue;
        };

        insert_notes(tx, &mut outcome, lesson_id, &path, slide_row_id, &slide.notes)?;
        insert_comments(
            tx,
            &mut outcome,
            &mut users,
            lesson_id,
            &path,
            slide_row_id,
            &slide.comments,
        )?;

        outcome.success_count += 1;
        outcome.slide_ids.push(slide_uuid);
    }

    Ok(outcome)
}

fn insert_notes(
    tx: &Transaction<'_>,
    outcome: &mut ReplaceOutcome,
    lesson_id: &str,
    slide_path: &str,
    slide_row_id: i64,
    notes: &[Note],
) -> RepoResult<()> {
    let mut order: i64 = 0;
    for (note_index, note) in notes.iter().enumerate() {
        let path = format!("{slide_path}.notes[{note_index}]");
        if note.content.trim().is_empty() {
            skip(outcome, lesson_id, ItemKind::Note, path, SkipReason::MissingContent);
            continue;
        }

        tx.execute(
            "INSERT INTO slide_notes (slide_row_id, content, kind, source, sort_order)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                slide_row_id,
                note.content.as_str(),
                note.kind.as_str(),
                note.source.as_deref(),
                order
            ],
        )?;
        order += 1;
    }
    Ok(())
}

fn insert_comments(
    tx: &Transaction<'_>,
    outcome: &mut ReplaceOutcome,
    users: &mut UserResolver<'_>,
    lesson_id: &str,
    slide_path: &str,
    slide_row_id: i64,
    comments: &[Comment],
) -> RepoResult<()> {
    let mut position: i64 = 0;
    for (comment_index, comment) in comments.iter().enumerate() {
        let path = format!("{slide_path}.comments[{comment_index}]");
        if comment.content.trim().is_empty() {
            skip(outcome, lesson_id, ItemKind::Comment, path, SkipReason::MissingContent);
            continue;
        }
        if !comment.sender.has_identity() {
            skip(outcome, lesson_id, ItemKind::Comment, path, SkipReason::MissingSender);
            continue;
        }
        let sender_id = comment.sender.id.trim();
        if !users.resolves(sender_id)? {
            let reason = SkipReason::UnknownSender(sender_id.to_string());
            skip(outcome, lesson_id, ItemKind::Comment, path, reason);
            continue;
        }

        let comment_uuid = id_or_new(&comment.id);
        let inserted = insert_row(
            tx,
            "INSERT INTO slide_comments (comment_uuid, slide_row_id, content, sender_id, position)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                comment_uuid,
                slide_row_id,
                comment.content.as_str(),
                sender_id,
                position
            ],
        )?;
        let Some(comment_row_id) = inserted else {
            let reason = SkipReason::DuplicateId(comment_uuid);
            skip(outcome, lesson_id, ItemKind::Comment, path, reason);
            continue;
        };
        position += 1;

        insert_reactions(
            tx,
            outcome,
            users,
            lesson_id,
            &path,
            comment_row_id,
            &comment.reactions,
        )?;
    }
    Ok(())
}

fn insert_reactions(
    tx: &Transaction<'_>,
    outcome: &mut ReplaceOutcome,
    users: &mut UserResolver<'_>,
    lesson_id: &str,
    comment_path: &str,
    comment_row_id: i64,
    reactions: &[Reaction],
) -> RepoResult<()> {
    let mut position: i64 = 0;
    for (reaction_index, reaction) in reactions.iter().enumerate() {
        let path = format!("{comment_path}.reactions[{reaction_index}]");
        if reaction.emoji.trim().is_empty() {
            skip(outcome, lesson_id, ItemKind::Reaction, path, SkipReason::MissingEmoji);
            continue;
        }
        if !reaction.user.has_identity() {
            skip(outcome, lesson_id, ItemKind::Reaction, path, SkipReason::MissingUser);
            continue;
        }
        let user_id = reaction.user.id.trim();
        if !users.resolves(user_id)? {
            let reason = SkipReason::UnknownUser(user_id.to_string());
            skip(outcome, lesson_id, ItemKind::Reaction, path, reason);
            continue;
        }

        let reaction_uuid = id_or_new(&reaction.id);
        let inserted = insert_row(
            tx,
            "INSERT INTO comment_reactions (reaction_uuid, comment_row_id, emoji, user_id, position)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                reaction_uuid,
                comment_row_id,
                reaction.emoji.trim(),
                user_id,
                position
            ],
        )?;
        if inserted.is_none() {
            let reason = SkipReason::DuplicateId(reaction_uuid);
            skip(outcome, lesson_id, ItemKind::Reaction, path, reason);
            continue;
        }
        position += 1;
    }
    Ok(())
}

/// Inserts one row; a constraint violation is reported as `None` so the
/// caller can skip the item without failing the transaction.
fn insert_row(tx: &Transaction<'_>, sql: &str, params: impl Params) -> RepoResult<Option<i64>> {
    match tx.execute(sql, params) {
        Ok(_) => Ok(Some(tx.last_insert_rowid())),
        Err(err) => {
            let err = DbError::from(err);
            if err.is_constraint_violation() {
                Ok(None)
            } else {
                Err(err.into())
            }
        }
    }
}

fn skip(
    outcome: &mut ReplaceOutcome,
    lesson_id: &str,
    kind: ItemKind,
    path: String,
    reason: SkipReason,
) {
    warn!(
        "event=deck_item_skip module=repo status=skip lesson_id={} item={} path={} reason={}",
        lesson_id,
        kind.as_str(),
        path,
        reason
    );
    outcome.skipped.push(SkippedItem { kind, path, reason });
}

fn check_deadline(started_at: Instant, timeout: Duration) -> RepoResult<()> {
    let elapsed = started_at.elapsed();
    if elapsed >= timeout {
        return Err(RepoError::Timeout {
            elapsed_ms: elapsed.as_millis(),
            limit_ms: timeout.as_millis(),
        });
    }
    Ok(())
}

fn id_or_new(id: &str) -> String {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        new_item_id()
    } else {
        trimmed.to_string()
    }
}

fn lesson_exists(conn: &Connection, lesson_id: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM lessons WHERE id = ?1);",
        [lesson_id],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn load_slides(conn: &Connection, lesson_id: &str) -> RepoResult<Vec<Slide>> {
    let mut stmt = conn.prepare(
        "SELECT row_id, slide_uuid, title
         FROM slides
         WHERE lesson_id = ?1
         ORDER BY position ASC, row_id ASC;",
    )?;
    let rows = stmt
        .query_map([lesson_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut slides = Vec::with_capacity(rows.len());
    for (row_id, id, title) in rows {
        slides.push(Slide {
            id,
            title,
            notes: load_notes(conn, row_id)?,
            comments: load_comments(conn, row_id)?,
        });
    }
    Ok(slides)
}

fn load_notes(conn: &Connection, slide_row_id: i64) -> RepoResult<Vec<Note>> {
    let mut stmt = conn.prepare(
        "SELECT content, kind, source, sort_order
         FROM slide_notes
         WHERE slide_row_id = ?1
         ORDER BY sort_order ASC;",
    )?;
    let mut rows = stmt.query([slide_row_id])?;
    let mut notes = Vec::new();
    while let Some(row) = rows.next()? {
        let kind_text: String = row.get(1)?;
        let kind = NoteType::parse(&kind_text).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid note kind `{kind_text}` in slide_notes.kind"))
        })?;
        notes.push(Note {
            content: row.get(0)?,
            kind,
            source: row.get(2)?,
            order: Some(row.get(3)?),
        });
    }
    Ok(notes)
}

fn load_comments(conn: &Connection, slide_row_id: i64) -> RepoResult<Vec<Comment>> {
    let mut stmt = conn.prepare(
        "SELECT c.row_id, c.comment_uuid, c.content, c.sender_id, u.name, u.image
         FROM slide_comments c
         LEFT JOIN users u ON u.id = c.sender_id
         WHERE c.slide_row_id = ?1
         ORDER BY c.position ASC, c.row_id ASC;",
    )?;
    let mut rows = stmt.query([slide_row_id])?;
    let mut comments = Vec::new();
    while let Some(row) = rows.next()? {
        let row_id: i64 = row.get(0)?;
        comments.push(Comment {
            id: row.get(1)?,
            content: row.get(2)?,
            sender: UserRef {
                id: row.get(3)?,
                name: row.get(4)?,
                image: row.get(5)?,
            },
            reactions: load_reactions(conn, row_id)?,
        });
    }
    Ok(comments)
}

fn load_reactions(conn: &Connection, comment_row_id: i64) -> RepoResult<Vec<Reaction>> {
    let mut stmt = conn.prepare(
        "SELECT r.reaction_uuid, r.emoji, r.user_id, u.name, u.image
         FROM comment_reactions r
         LEFT JOIN users u ON u.id = r.user_id
         WHERE r.comment_row_id = ?1
         ORDER BY r.position ASC, r.row_id ASC;",
    )?;
    let reactions = stmt
        .query_map([comment_row_id], |row| {
            Ok(Reaction {
                id: row.get(0)?,
                emoji: row.get(1)?,
                user: UserRef {
                    id: row.get(2)?,
                    name: row.get(3)?,
                    image: row.get(4)?,
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(reactions)
}

fn ensure_deck_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    Ok(())
}
