/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Comment storage: moderation state, role-dependent visibility, soft
//! deletion with a tombstone, and score votes.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::users::ANONYMOUS_ID;
use crate::util;
use chrono::{DateTime, Duration, Utc};
use tokio_postgres::Row;
use uuid::Uuid;

/// Replaces the text of deleted comments; thread structure survives.
pub const TOMBSTONE: &str = "[deleted]";

#[derive(Debug, Clone)]
pub struct Comment {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub page_id: Uuid,
    pub markdown: String,
    pub html: String,
    pub score: i64,
    pub is_approved: bool,
    pub is_spam: bool,
    pub is_deleted: bool,
    pub ts_created: DateTime<Utc>,
    pub ts_approved: Option<DateTime<Utc>>,
    pub ts_deleted: Option<DateTime<Utc>>,
    /// Nil UUID means an anonymous author.
    pub user_created: Uuid,
    pub user_approved: Option<Uuid>,
    pub user_deleted: Option<Uuid>,
}

impl Comment {
    pub fn is_anonymous(&self) -> bool {
        self.user_created == ANONYMOUS_ID
    }
}

/// Moderation outcome for a freshly submitted comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentState {
    Approved,
    Unapproved,
    Flagged,
}

/// The state decision, in rule order: moderators pass, moderation policies
/// hold back, the spam verdict flags, everything else goes straight through.
pub fn decide_state(
    author_moderates: bool,
    require_moderation: bool,
    author_anonymous: bool,
    moderate_anonymous: bool,
    auto_spam_filter: bool,
    scanner_spam: bool,
) -> CommentState {
    if author_moderates {
        CommentState::Approved
    } else if require_moderation || (author_anonymous && moderate_anonymous) {
        CommentState::Unapproved
    } else if auto_spam_filter && scanner_spam {
        CommentState::Flagged
    } else {
        CommentState::Approved
    }
}

/// The viewer class the visibility rule keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer {
    Anonymous,
    User(Uuid),
    Moderator,
}

/// Whether the viewer may see the comment at all. Deleted comments are a
/// separate knob handled by the listing query.
pub fn visible_to(comment: &Comment, viewer: Viewer) -> bool {
    if comment.is_deleted {
        return matches!(viewer, Viewer::Moderator);
    }
    if comment.is_approved {
        return true;
    }
    match viewer {
        Viewer::Anonymous => false,
        Viewer::User(id) => !comment.is_anonymous() && comment.user_created == id,
        Viewer::Moderator => true,
    }
}

/// Listing order; the wire keys match the domain `sort` config item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentSort {
    TimeAsc,
    TimeDesc,
    ScoreDesc,
}

impl CommentSort {
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "ta" => Some(CommentSort::TimeAsc),
            "td" => Some(CommentSort::TimeDesc),
            "sd" => Some(CommentSort::ScoreDesc),
            _ => None,
        }
    }

    /// Stable order: the comment id breaks ties.
    fn order_clause(self) -> &'static str {
        match self {
            CommentSort::TimeAsc => "ts_created ASC, id ASC",
            CommentSort::TimeDesc => "ts_created DESC, id ASC",
            CommentSort::ScoreDesc => "score DESC, ts_created DESC, id ASC",
        }
    }
}

/// Author edits are confined to a window after creation; moderators are
/// exempt.
pub fn within_edit_window(
    ts_created: DateTime<Utc>,
    now: DateTime<Utc>,
    window_seconds: i64,
) -> bool {
    now - ts_created <= Duration::seconds(window_seconds)
}

#[derive(Debug, thiserror::Error)]
pub enum VoteError {
    #[error("users may not vote on their own comments")]
    SelfVote,
    #[error(transparent)]
    Db(#[from] Error),
}

fn check_voter(author: Uuid, voter: Uuid) -> std::result::Result<(), VoteError> {
    if author == voter {
        return Err(VoteError::SelfVote);
    }
    Ok(())
}

/// Score movement for a vote upsert: the incoming direction is clamped to
/// `[-1, 1]` and the score moves by its difference from the stored vote.
/// Returns the clamped direction and the delta.
pub fn vote_delta(prev: i32, direction: i32) -> (i32, i64) {
    let direction = direction.clamp(-1, 1);
    (direction, i64::from(direction - prev))
}

const COMMENT_COLS: &str = "id, parent_id, page_id, markdown, html, score, is_approved, \
     is_spam, is_deleted, ts_created, ts_approved, ts_deleted, user_created, user_approved, \
     user_deleted";

fn comment_from_row(row: &Row) -> Comment {
    Comment {
        id: row.get(0),
        parent_id: row.get(1),
        page_id: row.get(2),
        markdown: row.get(3),
        html: row.get(4),
        score: row.get(5),
        is_approved: row.get(6),
        is_spam: row.get(7),
        is_deleted: row.get(8),
        ts_created: row.get(9),
        ts_approved: row.get(10),
        ts_deleted: row.get(11),
        user_created: row.get(12),
        user_approved: row.get(13),
        user_deleted: row.get(14),
    }
}

#[derive(Clone)]
pub struct CommentService {
    db: Database,
}

impl CommentService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Single INSERT; counter updates are the caller's responsibility so the
    /// pipeline controls ordering.
    pub async fn create(&self, c: &Comment) -> Result<()> {
        self.db
            .exec(
                &format!(
                    "INSERT INTO cm_comments({COMMENT_COLS}) VALUES \
                     ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
                ),
                &[
                    &c.id,
                    &c.parent_id,
                    &c.page_id,
                    &c.markdown,
                    &c.html,
                    &c.score,
                    &c.is_approved,
                    &c.is_spam,
                    &c.is_deleted,
                    &c.ts_created,
                    &c.ts_approved,
                    &c.ts_deleted,
                    &c.user_created,
                    &c.user_approved,
                    &c.user_deleted,
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn by_id(&self, id: Uuid) -> Result<Comment> {
        let row = self
            .db
            .query_row(
                &format!("SELECT {COMMENT_COLS} FROM cm_comments WHERE id = $1"),
                &[&id],
            )
            .await?;
        Ok(comment_from_row(&row))
    }

    /// Lists a page's comments under the visibility rule for the viewer.
    /// `show_deleted` only has effect for moderators.
    pub async fn list(
        &self,
        page_id: Uuid,
        viewer: Viewer,
        show_deleted: bool,
        sort: CommentSort,
    ) -> Result<Vec<Comment>> {
        let order = sort.order_clause();
        let rows = match viewer {
            Viewer::Anonymous => {
                self.db
                    .query(
                        &format!(
                            "SELECT {COMMENT_COLS} FROM cm_comments \
                             WHERE page_id = $1 AND is_approved AND NOT is_deleted \
                             ORDER BY {order}"
                        ),
                        &[&page_id],
                    )
                    .await?
            }
            Viewer::User(user_id) => {
                self.db
                    .query(
                        &format!(
                            "SELECT {COMMENT_COLS} FROM cm_comments \
                             WHERE page_id = $1 AND NOT is_deleted \
                               AND (is_approved OR user_created = $2) \
                             ORDER BY {order}"
                        ),
                        &[&page_id, &user_id],
                    )
                    .await?
            }
            Viewer::Moderator if show_deleted => {
                self.db
                    .query(
                        &format!(
                            "SELECT {COMMENT_COLS} FROM cm_comments WHERE page_id = $1 \
                             ORDER BY {order}"
                        ),
                        &[&page_id],
                    )
                    .await?
            }
            Viewer::Moderator => {
                self.db
                    .query(
                        &format!(
                            "SELECT {COMMENT_COLS} FROM cm_comments \
                             WHERE page_id = $1 AND NOT is_deleted \
                             ORDER BY {order}"
                        ),
                        &[&page_id],
                    )
                    .await?
            }
        };
        Ok(rows.iter().map(comment_from_row).collect())
    }

    /// Text replacement for an edit. The spam flag carries the post-edit
    /// verdict; approval state is left untouched.
    pub async fn update_text(
        &self,
        id: Uuid,
        markdown: &str,
        html: &str,
        spam: bool,
    ) -> Result<()> {
        self.db
            .exec_one(
                "UPDATE cm_comments SET markdown = $2, html = $3, is_spam = $4 \
                 WHERE id = $1 AND NOT is_deleted",
                &[&id, &markdown, &html, &spam],
            )
            .await
    }

    /// Moderator approve/unapprove. Approving also clears the spam flag.
    pub async fn moderate(&self, id: Uuid, approve: bool, moderator: Uuid) -> Result<()> {
        if approve {
            let now = util::now();
            self.db
                .exec_one(
                    "UPDATE cm_comments \
                     SET is_approved = true, is_spam = false, ts_approved = $2, \
                         user_approved = $3 \
                     WHERE id = $1 AND NOT is_deleted",
                    &[&id, &now, &moderator],
                )
                .await
        } else {
            self.db
                .exec_one(
                    "UPDATE cm_comments \
                     SET is_approved = false, ts_approved = NULL, user_approved = NULL \
                     WHERE id = $1 AND NOT is_deleted",
                    &[&id],
                )
                .await
        }
    }

    /// Soft delete: tombstone the text, record who and when. Returns the
    /// comment's page so the caller can decrement counters.
    pub async fn delete(&self, id: Uuid, deleter: Uuid) -> Result<Uuid> {
        let now = util::now();
        let row = self
            .db
            .query_row(
                "UPDATE cm_comments \
                 SET is_deleted = true, markdown = $2, html = $2, ts_deleted = $3, \
                     user_deleted = $4 \
                 WHERE id = $1 AND NOT is_deleted \
                 RETURNING page_id",
                &[&id, &TOMBSTONE, &now, &deleter],
            )
            .await?;
        Ok(row.get(0))
    }

    /// Vote upsert inside one transaction: at most one row per
    /// (comment, voter), score moved by the direction delta. Voting on one's
    /// own comment is rejected before anything is written.
    pub async fn vote(
        &self,
        comment_id: Uuid,
        voter: Uuid,
        direction: i32,
    ) -> std::result::Result<i64, VoteError> {
        let mut client = self.db.client().await?;
        let tx = client.transaction().await.map_err(Error::from)?;
        let row = tx
            .query_opt(
                "SELECT user_created FROM cm_comments WHERE id = $1 FOR UPDATE",
                &[&comment_id],
            )
            .await
            .map_err(Error::from)?
            .ok_or(Error::NotFound)?;
        let author: Uuid = row.get(0);
        check_voter(author, voter)?;
        let prev = tx
            .query_opt(
                "SELECT direction FROM cm_comment_votes \
                 WHERE comment_id = $1 AND user_id = $2",
                &[&comment_id, &voter],
            )
            .await
            .map_err(Error::from)?
            .map(|r| r.get::<_, i32>(0))
            .unwrap_or(0);
        let (direction, delta) = vote_delta(prev, direction);
        let now = util::now();
        tx.execute(
            "INSERT INTO cm_comment_votes(comment_id, user_id, direction, ts_voted) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (comment_id, user_id) \
             DO UPDATE SET direction = EXCLUDED.direction, ts_voted = EXCLUDED.ts_voted",
            &[&comment_id, &voter, &direction, &now],
        )
        .await
        .map_err(Error::from)?;
        let row = tx
            .query_one(
                "UPDATE cm_comments SET score = score + $2 WHERE id = $1 RETURNING score",
                &[&comment_id, &delta],
            )
            .await
            .map_err(Error::from)?;
        tx.commit().await.map_err(Error::from)?;
        Ok(row.get(0))
    }

    /// Count of pending comments on a page, for moderator dashboards.
    pub async fn count_pending(&self, page_id: Uuid) -> Result<i64> {
        let row = self
            .db
            .query_row(
                "SELECT count(*) FROM cm_comments \
                 WHERE page_id = $1 AND NOT is_approved AND NOT is_deleted",
                &[&page_id],
            )
            .await?;
        Ok(row.get(0))
    }
}

/// Builder for a new comment in the given state.
pub fn new_comment(
    page_id: Uuid,
    parent_id: Option<Uuid>,
    author: Uuid,
    markdown: String,
    html: String,
    state: CommentState,
) -> Comment {
    let now = util::now();
    let approved = state == CommentState::Approved;
    Comment {
        id: Uuid::new_v4(),
        parent_id,
        page_id,
        markdown,
        html,
        score: 0,
        is_approved: approved,
        is_spam: state == CommentState::Flagged,
        is_deleted: false,
        ts_created: now,
        ts_approved: approved.then_some(now),
        ts_deleted: None,
        user_created: author,
        user_approved: None,
        user_deleted: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(approved: bool, deleted: bool, author: Uuid) -> Comment {
        let mut c = new_comment(
            Uuid::new_v4(),
            None,
            author,
            "hi".into(),
            "<p>hi</p>".into(),
            if approved {
                CommentState::Approved
            } else {
                CommentState::Unapproved
            },
        );
        c.is_deleted = deleted;
        c
    }

    #[test]
    fn state_decision_order() {
        use CommentState::*;
        // Moderator wins regardless of everything else.
        assert_eq!(decide_state(true, true, true, true, true, true), Approved);
        // Moderation policy before the spam verdict.
        assert_eq!(decide_state(false, true, false, false, true, true), Unapproved);
        assert_eq!(decide_state(false, false, true, true, false, false), Unapproved);
        // Spam only flags when the domain filter is on.
        assert_eq!(decide_state(false, false, false, false, true, true), Flagged);
        assert_eq!(decide_state(false, false, false, false, false, true), Approved);
        assert_eq!(decide_state(false, false, false, false, true, false), Approved);
    }

    #[test]
    fn anonymous_viewer_sees_only_approved() {
        let author = Uuid::new_v4();
        assert!(visible_to(&comment(true, false, author), Viewer::Anonymous));
        assert!(!visible_to(&comment(false, false, author), Viewer::Anonymous));
        assert!(!visible_to(&comment(true, true, author), Viewer::Anonymous));
    }

    #[test]
    fn author_sees_own_pending() {
        let author = Uuid::new_v4();
        let pending = comment(false, false, author);
        assert!(visible_to(&pending, Viewer::User(author)));
        assert!(!visible_to(&pending, Viewer::User(Uuid::new_v4())));
    }

    #[test]
    fn anonymous_pending_not_claimable() {
        // Nil author means anonymous; no signed-in user owns such a comment.
        let pending = comment(false, false, ANONYMOUS_ID);
        assert!(!visible_to(&pending, Viewer::User(ANONYMOUS_ID)));
        assert!(visible_to(&pending, Viewer::Moderator));
    }

    #[test]
    fn moderator_sees_deleted() {
        let c = comment(true, true, Uuid::new_v4());
        assert!(visible_to(&c, Viewer::Moderator));
        assert!(!visible_to(&c, Viewer::User(c.user_created)));
    }

    #[test]
    fn sort_keys() {
        assert_eq!(CommentSort::parse("ta"), Some(CommentSort::TimeAsc));
        assert_eq!(CommentSort::parse("td"), Some(CommentSort::TimeDesc));
        assert_eq!(CommentSort::parse("sd"), Some(CommentSort::ScoreDesc));
        assert_eq!(CommentSort::parse("zz"), None);
    }

    #[test]
    fn edit_window() {
        let t0 = util::now();
        assert!(within_edit_window(t0, t0 + Duration::seconds(599), 600));
        assert!(within_edit_window(t0, t0 + Duration::seconds(600), 600));
        assert!(!within_edit_window(t0, t0 + Duration::seconds(601), 600));
        assert!(!within_edit_window(t0, t0 + Duration::seconds(1), 0));
    }

    #[test]
    fn vote_deltas_over_a_flip_sequence() {
        // +1, then -1, then +1 again: the upserted row stays single, the
        // score moves by +1, -2, +2.
        let mut prev = 0;
        let mut score = 0i64;
        for (dir, expected_delta) in [(1, 1), (-1, -2), (1, 2)] {
            let (stored, delta) = vote_delta(prev, dir);
            assert_eq!(delta, expected_delta);
            score += delta;
            prev = stored;
        }
        assert_eq!(score, 1);
        // Re-sending the same direction is a no-op on the score.
        assert_eq!(vote_delta(1, 1), (1, 0));
    }

    #[test]
    fn vote_direction_is_clamped() {
        assert_eq!(vote_delta(0, 5), (1, 1));
        assert_eq!(vote_delta(1, -17), (-1, -2));
        assert_eq!(vote_delta(-1, 0), (0, 1));
    }

    #[test]
    fn own_comment_vote_is_rejected() {
        let author = Uuid::new_v4();
        assert!(matches!(
            check_voter(author, author),
            Err(VoteError::SelfVote)
        ));
        assert!(check_voter(author, Uuid::new_v4()).is_ok());
    }
}
