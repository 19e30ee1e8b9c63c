//! Claim-batch workflow: reserve, release and complete groups of files.
//!
//! Every mutating operation runs in one immediate transaction, so either all
//! file rows and the claim row change together or nothing changes.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, info_span};

use super::error::BatchError;
use crate::auth::{Actor, Permission};
use crate::config::ClaimsConfig;
use crate::db::claim_repo::{self, ClaimRow};
use crate::db::file_item_repo::{self, FileItemRow, FileScope};
use crate::db::order_repo;
use crate::db::Database;
use crate::status::{FileStatus, OrderStatus};

/// Progress of a single claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    pub total_files: u64,
    pub completed_files: u64,
    pub pending_files: u64,
    /// Rounded to the nearest whole percent; 0 for an empty claim.
    pub progress_percentage: u8,
}

impl BatchStats {
    fn new(total_files: u64, completed_files: u64) -> Self {
        let progress_percentage = if total_files > 0 {
            ((completed_files as f64 / total_files as f64) * 100.0).round() as u8
        } else {
            0
        };
        Self {
            total_files,
            completed_files,
            pending_files: total_files.saturating_sub(completed_files),
            progress_percentage,
        }
    }
}

/// Service owning the claim lifecycle.
#[derive(Clone)]
pub struct FileBatchService {
    db: Database,
    max_batch_size: u32,
}

impl FileBatchService {
    pub fn new(db: Database) -> Self {
        Self::with_config(db, &ClaimsConfig::default())
    }

    pub fn with_config(db: Database, claims: &ClaimsConfig) -> Self {
        Self {
            db,
            max_batch_size: claims.max_batch_size,
        }
    }

    pub fn max_batch_size(&self) -> u32 {
        self.max_batch_size
    }

    /// Reserves up to `batch_size` pending, unassigned files of an order.
    ///
    /// Files are taken lowest id first. On success the files are `claimed`
    /// and assigned to the actor, a claim row lists them, and a `pending`
    /// order moves to `in_progress`. Returns `Ok(None)` without writing
    /// anything when no file is eligible.
    pub fn claim_batch(
        &self,
        actor: &Actor,
        order_id: i64,
        batch_size: u32,
        scope: &FileScope,
    ) -> Result<Option<ClaimRow>, BatchError> {
        actor.require(Permission::EditFiles)?;
        if batch_size == 0 || batch_size > self.max_batch_size {
            return Err(BatchError::InvalidBatchSize {
                requested: batch_size,
                max: self.max_batch_size,
            });
        }

        let span = info_span!("claim_batch", order_id, user_id = actor.user_id, batch_size);
        let _guard = span.enter();

        let claim = self.db.with_transaction(|tx| -> Result<_, BatchError> {
            let order = order_repo::find_by_id(tx, order_id)?
                .ok_or(BatchError::OrderNotFound(order_id))?;

            let file_ids = file_item_repo::select_claimable(tx, order_id, scope, batch_size)?;
            if file_ids.is_empty() {
                return Ok(None);
            }

            let now = Utc::now();
            let claim = claim_repo::insert(tx, actor.user_id, order_id, &file_ids, now)?;
            let assigned =
                file_item_repo::assign(tx, &file_ids, actor.user_id, FileStatus::Claimed, now)?;
            debug_assert_eq!(assigned, file_ids.len());

            if order.status == OrderStatus::Pending {
                order_repo::transition(
                    tx,
                    order_id,
                    &[OrderStatus::Pending],
                    OrderStatus::InProgress,
                    now,
                )?;
            }

            Ok(Some(claim))
        })?;

        match &claim {
            Some(claim) => info!(
                claim_id = claim.id,
                files = claim.file_ids.len(),
                "Claimed batch"
            ),
            None => info!("No files available to claim"),
        }
        Ok(claim)
    }

    /// Returns a claim's still-`claimed` files to the pool and deletes the claim.
    ///
    /// Files already moved past `claimed` keep their state and assignee.
    /// Returns the number of files released.
    pub fn release_batch(&self, actor: &Actor, claim_id: i64) -> Result<usize, BatchError> {
        actor.require(Permission::EditFiles)?;

        let released = self.db.with_transaction(|tx| -> Result<_, BatchError> {
            let claim = load_claim(tx, claim_id)?;
            ensure_owner(actor, &claim)?;

            let released = file_item_repo::release_claimed(tx, &claim.file_ids, Utc::now())?;
            claim_repo::delete(tx, claim.id)?;
            Ok(released)
        })?;

        info!(claim_id, released, "Released batch");
        Ok(released)
    }

    /// Completes every file of a claim and closes the claim.
    ///
    /// Completes the order as well when no file of it is left incomplete.
    pub fn complete_batch(&self, actor: &Actor, claim_id: i64) -> Result<ClaimRow, BatchError> {
        actor.require(Permission::EditFiles)?;

        let claim = self.db.with_transaction(|tx| -> Result<_, BatchError> {
            let claim = load_claim(tx, claim_id)?;
            ensure_owner(actor, &claim)?;
            complete_claim_in(tx, claim, Utc::now())
        })?;

        info!(claim_id, "Completed batch");
        Ok(claim)
    }

    /// Completes one member file; completes the whole claim if it was the last.
    pub fn complete_file_in_batch(
        &self,
        actor: &Actor,
        claim_id: i64,
        file_id: i64,
    ) -> Result<FileItemRow, BatchError> {
        actor.require(Permission::EditFiles)?;

        let file = self.db.with_transaction(|tx| -> Result<_, BatchError> {
            let claim = load_claim(tx, claim_id)?;
            ensure_owner(actor, &claim)?;
            ensure_member(&claim, file_id)?;

            let file = file_item_repo::find_by_id(tx, file_id)?
                .ok_or(BatchError::FileNotFound(file_id))?;

            let now = Utc::now();
            if file.status != FileStatus::Completed {
                file_item_repo::mark_completed(tx, &[file_id], now)?;
            }

            if file_item_repo::count_uncompleted_in(tx, &claim.file_ids)? == 0 {
                debug!(claim_id, "Last file of batch completed");
                complete_claim_in(tx, claim, now)?;
            }

            file_item_repo::find_by_id(tx, file_id)?.ok_or(BatchError::FileNotFound(file_id))
        })?;

        info!(claim_id, file_id, "Completed file in batch");
        Ok(file)
    }

    /// Moves a member file from `claimed` to `processing`.
    pub fn start_processing(
        &self,
        actor: &Actor,
        claim_id: i64,
        file_id: i64,
    ) -> Result<FileItemRow, BatchError> {
        actor.require(Permission::EditFiles)?;

        self.db.with_transaction(|tx| -> Result<_, BatchError> {
            let claim = load_claim(tx, claim_id)?;
            ensure_owner(actor, &claim)?;
            ensure_member(&claim, file_id)?;

            let file = file_item_repo::find_by_id(tx, file_id)?
                .ok_or(BatchError::FileNotFound(file_id))?;
            if file.status != FileStatus::Claimed
                || !file_item_repo::transition(
                    tx,
                    file_id,
                    FileStatus::Claimed,
                    FileStatus::Processing,
                    Utc::now(),
                )?
            {
                return Err(BatchError::InvalidFileTransition {
                    file_id,
                    from: file.status,
                    to: FileStatus::Processing,
                });
            }

            file_item_repo::find_by_id(tx, file_id)?.ok_or(BatchError::FileNotFound(file_id))
        })
    }

    /// Sets a file's status outside the batch workflow.
    ///
    /// This is how files left behind by a released claim are finished or
    /// returned: a `processing` file keeps its assignee after release and no
    /// claim lists it any more. Only the assignee, or an actor allowed to
    /// edit orders, may change a file.
    ///
    /// - `pending` returns a claimed or processing file to the pool; refused
    ///   while an open claim still lists it.
    /// - `processing` requires the file to be `claimed`.
    /// - `completed` finishes the file, then the open claim listing it and
    ///   the order once nothing is left.
    /// - `claimed` is only reachable through [`FileBatchService::claim_batch`].
    pub fn update_file_status(
        &self,
        actor: &Actor,
        file_id: i64,
        status: FileStatus,
    ) -> Result<FileItemRow, BatchError> {
        actor.require(Permission::EditFiles)?;

        let file = self.db.with_transaction(|tx| -> Result<_, BatchError> {
            let file = file_item_repo::find_by_id(tx, file_id)?
                .ok_or(BatchError::FileNotFound(file_id))?;
            if !actor.may_handle(file.assigned_to) {
                return Err(BatchError::NotAssignee {
                    file_id,
                    user_id: actor.user_id,
                });
            }
            let invalid = BatchError::InvalidFileTransition {
                file_id,
                from: file.status,
                to: status,
            };

            let now = Utc::now();
            match status {
                FileStatus::Pending => {
                    if !file.status.is_in_flight() {
                        return Err(invalid);
                    }
                    let open = claim_repo::find_open_containing(tx, file.order_id, file_id)?;
                    if let Some(claim) = open {
                        return Err(BatchError::FileInOpenBatch {
                            file_id,
                            claim_id: claim.id,
                        });
                    }
                    file_item_repo::reset_to_pending(tx, file_id, now)?;
                }
                FileStatus::Claimed => return Err(invalid),
                FileStatus::Processing => {
                    if !file_item_repo::transition(
                        tx,
                        file_id,
                        FileStatus::Claimed,
                        FileStatus::Processing,
                        now,
                    )? {
                        return Err(invalid);
                    }
                }
                FileStatus::Completed => {
                    if file.status == FileStatus::Completed {
                        return Err(invalid);
                    }
                    if file.assigned_to.is_none() {
                        file_item_repo::assign(
                            tx,
                            &[file_id],
                            actor.user_id,
                            FileStatus::Completed,
                            now,
                        )?;
                    }
                    file_item_repo::mark_completed(tx, &[file_id], now)?;

                    let open = claim_repo::find_open_containing(tx, file.order_id, file_id)?;
                    match open {
                        Some(claim)
                            if file_item_repo::count_uncompleted_in(tx, &claim.file_ids)? == 0 =>
                        {
                            complete_claim_in(tx, claim, now)?;
                        }
                        _ => {
                            complete_order_if_done(tx, file.order_id, now)?;
                        }
                    }
                }
            }

            file_item_repo::find_by_id(tx, file_id)?.ok_or(BatchError::FileNotFound(file_id))
        })?;

        info!(file_id, status = %status, "Updated file status");
        Ok(file)
    }

    /// Finds a claim by id.
    pub fn find_claim(&self, actor: &Actor, claim_id: i64) -> Result<ClaimRow, BatchError> {
        actor.require(Permission::ViewClaims)?;
        self.db.with_conn(|conn| claim_repo::find_by_id(conn, claim_id))?
            .ok_or(BatchError::ClaimNotFound(claim_id))
    }

    /// Loads the files of a claim in claim order.
    pub fn batch_files(&self, actor: &Actor, claim_id: i64) -> Result<Vec<FileItemRow>, BatchError> {
        actor.require(Permission::ViewClaims)?;
        let files = self.db.with_conn(|conn| {
            let claim = claim_repo::find_by_id(conn, claim_id)?;
            match claim {
                Some(claim) => file_item_repo::find_by_ids(conn, &claim.file_ids).map(Some),
                None => Ok(None),
            }
        })?;
        files.ok_or(BatchError::ClaimNotFound(claim_id))
    }

    /// Lists the actor's claims that are not completed, newest first.
    pub fn user_active_batches(&self, actor: &Actor) -> Result<Vec<ClaimRow>, BatchError> {
        actor.require(Permission::ViewClaims)?;
        Ok(self
            .db
            .with_conn(|conn| claim_repo::list_active_for_user(conn, actor.user_id))?)
    }

    /// Lists every claim of an order, newest first.
    pub fn order_claims(&self, actor: &Actor, order_id: i64) -> Result<Vec<ClaimRow>, BatchError> {
        actor.require(Permission::ViewClaims)?;
        Ok(self
            .db
            .with_conn(|conn| claim_repo::list_for_order(conn, order_id))?)
    }

    /// Progress figures for one claim.
    pub fn batch_stats(&self, actor: &Actor, claim_id: i64) -> Result<BatchStats, BatchError> {
        actor.require(Permission::ViewClaims)?;
        let stats = self.db.with_conn(|conn| {
            let claim = claim_repo::find_by_id(conn, claim_id)?;
            match claim {
                Some(claim) => {
                    let completed = file_item_repo::count_completed_in(conn, &claim.file_ids)?;
                    Ok(Some(BatchStats::new(claim.file_ids.len() as u64, completed)))
                }
                None => Ok(None),
            }
        })?;
        stats.ok_or(BatchError::ClaimNotFound(claim_id))
    }
}

fn load_claim(conn: &Connection, claim_id: i64) -> Result<ClaimRow, BatchError> {
    claim_repo::find_by_id(conn, claim_id)?.ok_or(BatchError::ClaimNotFound(claim_id))
}

fn ensure_owner(actor: &Actor, claim: &ClaimRow) -> Result<(), BatchError> {
    if claim.user_id == actor.user_id {
        Ok(())
    } else {
        Err(BatchError::NotClaimOwner {
            claim_id: claim.id,
            owner_id: claim.user_id,
            user_id: actor.user_id,
        })
    }
}

fn ensure_member(claim: &ClaimRow, file_id: i64) -> Result<(), BatchError> {
    if claim.contains(file_id) {
        Ok(())
    } else {
        Err(BatchError::NotInBatch {
            claim_id: claim.id,
            file_id,
        })
    }
}

/// Marks a claim and all its files completed, then re-derives the order status
/// from a fresh count. A claim that is already completed is returned as is.
fn complete_claim_in(
    conn: &Connection,
    mut claim: ClaimRow,
    now: DateTime<Utc>,
) -> Result<ClaimRow, BatchError> {
    if claim.is_completed {
        debug!(claim_id = claim.id, "Batch already completed");
        return Ok(claim);
    }

    claim_repo::mark_completed(conn, claim.id, now)?;
    file_item_repo::mark_completed(conn, &claim.file_ids, now)?;
    complete_order_if_done(conn, claim.order_id, now)?;

    claim.is_completed = true;
    claim.completed_at = Some(now);
    Ok(claim)
}

/// Completes an open order that has files and none left uncompleted.
fn complete_order_if_done(
    conn: &Connection,
    order_id: i64,
    now: DateTime<Utc>,
) -> Result<bool, BatchError> {
    if file_item_repo::count_uncompleted_for_order(conn, order_id)? > 0
        || file_item_repo::count_for_order(conn, order_id)? == 0
    {
        return Ok(false);
    }

    let completed = order_repo::transition(
        conn,
        order_id,
        &[OrderStatus::Pending, OrderStatus::InProgress],
        OrderStatus::Completed,
        now,
    )?;
    if completed {
        info!(order_id, "Order completed");
    }
    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::db::file_item_repo::NewFileItem;
    use crate::db::order_repo::NewOrderRow;
    use crate::db::user_repo::{self, NewUser};

    struct Fixture {
        service: FileBatchService,
        db: Database,
        alice: Actor,
        bob: Actor,
        order_id: i64,
        file_ids: Vec<i64>,
    }

    fn fixture(file_count: usize) -> Fixture {
        let db = Database::open_in_memory().expect("Failed to create test database");
        let (alice, bob, order_id, file_ids) = db
            .with_conn(|conn| {
                let mk_user = |email: &str| {
                    user_repo::insert(
                        conn,
                        &NewUser {
                            name: email.to_string(),
                            email: email.to_string(),
                            role: Role::User,
                        },
                        Utc::now(),
                    )
                };
                let alice = mk_user("alice@example.com")?;
                let bob = mk_user("bob@example.com")?;
                let order_id = order_repo::insert(
                    conn,
                    &NewOrderRow {
                        order_number: "ORD-1".to_string(),
                        name: "Order".to_string(),
                        description: None,
                        customer_name: None,
                        deadline: None,
                        created_by: alice,
                    },
                    Utc::now(),
                )?;
                let file_ids = (0..file_count)
                    .map(|i| {
                        file_item_repo::insert(
                            conn,
                            &NewFileItem {
                                order_id,
                                folder_id: None,
                                subfolder_id: None,
                                name: format!("img{}.jpg", i),
                                original_name: format!("img{}.jpg", i),
                                path: format!("orders/{}/img{}.jpg", order_id, i),
                                directory_path: None,
                                file_type: "jpg".to_string(),
                                mime_type: None,
                                file_size: 10,
                            },
                            Utc::now(),
                        )
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((alice, bob, order_id, file_ids))
            })
            .unwrap();

        Fixture {
            service: FileBatchService::new(db.clone()),
            db,
            alice: Actor::new(alice, Role::User),
            bob: Actor::new(bob, Role::User),
            order_id,
            file_ids,
        }
    }

    fn file(f: &Fixture, id: i64) -> FileItemRow {
        f.db.with_conn(|conn| file_item_repo::find_by_id(conn, id))
            .unwrap()
            .unwrap()
    }

    fn order_status(f: &Fixture) -> OrderStatus {
        f.db.with_conn(|conn| order_repo::find_by_id(conn, f.order_id))
            .unwrap()
            .unwrap()
            .status
    }

    #[test]
    fn test_claim_assigns_files_and_starts_order() {
        let f = fixture(5);
        let claim = f
            .service
            .claim_batch(&f.alice, f.order_id, 3, &FileScope::Order)
            .unwrap()
            .unwrap();

        assert_eq!(claim.file_ids, f.file_ids[..3].to_vec());
        assert_eq!(claim.user_id, f.alice.user_id);
        for id in &claim.file_ids {
            let row = file(&f, *id);
            assert_eq!(row.status, FileStatus::Claimed);
            assert_eq!(row.assigned_to, Some(f.alice.user_id));
        }
        assert_eq!(file(&f, f.file_ids[3]).status, FileStatus::Pending);
        assert_eq!(order_status(&f), OrderStatus::InProgress);
    }

    #[test]
    fn test_claim_with_nothing_available() {
        let f = fixture(0);
        let claim = f
            .service
            .claim_batch(&f.alice, f.order_id, 5, &FileScope::Order)
            .unwrap();
        assert!(claim.is_none());
        assert!(f.service.order_claims(&f.alice, f.order_id).unwrap().is_empty());
        assert_eq!(order_status(&f), OrderStatus::Pending);
    }

    #[test]
    fn test_claim_rejects_bad_batch_size() {
        let f = fixture(1);
        for size in [0, 51] {
            let err = f
                .service
                .claim_batch(&f.alice, f.order_id, size, &FileScope::Order)
                .unwrap_err();
            assert!(matches!(err, BatchError::InvalidBatchSize { max: 50, .. }));
        }
    }

    #[test]
    fn test_claim_unknown_order() {
        let f = fixture(1);
        let err = f
            .service
            .claim_batch(&f.alice, 999, 1, &FileScope::Order)
            .unwrap_err();
        assert!(matches!(err, BatchError::OrderNotFound(999)));
    }

    #[test]
    fn test_claim_requires_permission() {
        let f = fixture(1);
        let viewer = Actor::with_permissions(f.alice.user_id, Role::User, [Permission::ViewOrders]);
        let err = f
            .service
            .claim_batch(&viewer, f.order_id, 1, &FileScope::Order)
            .unwrap_err();
        assert!(matches!(err, BatchError::Forbidden(_)));
    }

    #[test]
    fn test_sequential_claims_do_not_overlap() {
        let f = fixture(4);
        let first = f
            .service
            .claim_batch(&f.alice, f.order_id, 2, &FileScope::Order)
            .unwrap()
            .unwrap();
        let second = f
            .service
            .claim_batch(&f.bob, f.order_id, 5, &FileScope::Order)
            .unwrap()
            .unwrap();
        assert_eq!(second.file_ids, f.file_ids[2..].to_vec());
        assert!(first.file_ids.iter().all(|id| !second.contains(*id)));
    }

    #[test]
    fn test_release_returns_claimed_files() {
        let f = fixture(3);
        let claim = f
            .service
            .claim_batch(&f.alice, f.order_id, 3, &FileScope::Order)
            .unwrap()
            .unwrap();
        f.service
            .complete_file_in_batch(&f.alice, claim.id, f.file_ids[0])
            .unwrap();

        let released = f.service.release_batch(&f.alice, claim.id).unwrap();
        assert_eq!(released, 2);

        let done = file(&f, f.file_ids[0]);
        assert_eq!(done.status, FileStatus::Completed);
        for id in &f.file_ids[1..] {
            let row = file(&f, *id);
            assert_eq!(row.status, FileStatus::Pending);
            assert!(row.assigned_to.is_none());
        }
        assert!(matches!(
            f.service.find_claim(&f.alice, claim.id),
            Err(BatchError::ClaimNotFound(_))
        ));
    }

    #[test]
    fn test_only_owner_may_release() {
        let f = fixture(1);
        let claim = f
            .service
            .claim_batch(&f.alice, f.order_id, 1, &FileScope::Order)
            .unwrap()
            .unwrap();
        let err = f.service.release_batch(&f.bob, claim.id).unwrap_err();
        assert!(matches!(err, BatchError::NotClaimOwner { .. }));
        assert_eq!(file(&f, f.file_ids[0]).status, FileStatus::Claimed);
    }

    #[test]
    fn test_complete_batch_completes_order_when_last() {
        let f = fixture(2);
        let claim = f
            .service
            .claim_batch(&f.alice, f.order_id, 2, &FileScope::Order)
            .unwrap()
            .unwrap();
        let done = f.service.complete_batch(&f.alice, claim.id).unwrap();
        assert!(done.is_completed);
        assert!(done.completed_at.is_some());

        for id in &f.file_ids {
            let row = file(&f, *id);
            assert_eq!(row.status, FileStatus::Completed);
            assert!(row.is_processed);
        }

        let order = f
            .db
            .with_conn(|conn| order_repo::find_by_id(conn, f.order_id))
            .unwrap()
            .unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.completed_at.is_some());
    }

    #[test]
    fn test_complete_batch_leaves_order_open_with_remaining_files() {
        let f = fixture(3);
        let claim = f
            .service
            .claim_batch(&f.alice, f.order_id, 2, &FileScope::Order)
            .unwrap()
            .unwrap();
        f.service.complete_batch(&f.alice, claim.id).unwrap();
        assert_eq!(order_status(&f), OrderStatus::InProgress);
    }

    #[test]
    fn test_complete_batch_twice_is_noop() {
        let f = fixture(1);
        let claim = f
            .service
            .claim_batch(&f.alice, f.order_id, 1, &FileScope::Order)
            .unwrap()
            .unwrap();
        let first = f.service.complete_batch(&f.alice, claim.id).unwrap();
        let second = f.service.complete_batch(&f.alice, claim.id).unwrap();
        assert_eq!(first.completed_at, second.completed_at);
    }

    #[test]
    fn test_complete_file_not_in_batch() {
        let f = fixture(3);
        let claim = f
            .service
            .claim_batch(&f.alice, f.order_id, 1, &FileScope::Order)
            .unwrap()
            .unwrap();
        let outsider = f.file_ids[2];
        let err = f
            .service
            .complete_file_in_batch(&f.alice, claim.id, outsider)
            .unwrap_err();
        assert!(matches!(
            err,
            BatchError::NotInBatch { file_id, .. } if file_id == outsider
        ));
        assert_eq!(file(&f, outsider).status, FileStatus::Pending);
        assert_eq!(file(&f, f.file_ids[0]).status, FileStatus::Claimed);
    }

    #[test]
    fn test_completing_last_file_cascades() {
        let f = fixture(2);
        let claim = f
            .service
            .claim_batch(&f.alice, f.order_id, 2, &FileScope::Order)
            .unwrap()
            .unwrap();

        f.service
            .complete_file_in_batch(&f.alice, claim.id, f.file_ids[0])
            .unwrap();
        let open = f.service.find_claim(&f.alice, claim.id).unwrap();
        assert!(!open.is_completed);
        assert_eq!(order_status(&f), OrderStatus::InProgress);

        let last = f
            .service
            .complete_file_in_batch(&f.alice, claim.id, f.file_ids[1])
            .unwrap();
        assert_eq!(last.status, FileStatus::Completed);
        let closed = f.service.find_claim(&f.alice, claim.id).unwrap();
        assert!(closed.is_completed);
        assert_eq!(order_status(&f), OrderStatus::Completed);
    }

    #[test]
    fn test_start_processing() {
        let f = fixture(1);
        let claim = f
            .service
            .claim_batch(&f.alice, f.order_id, 1, &FileScope::Order)
            .unwrap()
            .unwrap();
        let row = f
            .service
            .start_processing(&f.alice, claim.id, f.file_ids[0])
            .unwrap();
        assert_eq!(row.status, FileStatus::Processing);
        assert_eq!(row.assigned_to, Some(f.alice.user_id));

        let err = f
            .service
            .start_processing(&f.alice, claim.id, f.file_ids[0])
            .unwrap_err();
        assert!(matches!(
            err,
            BatchError::InvalidFileTransition {
                from: FileStatus::Processing,
                ..
            }
        ));

        // A processing file is not returned on release.
        assert_eq!(f.service.release_batch(&f.alice, claim.id).unwrap(), 0);
        assert_eq!(file(&f, f.file_ids[0]).status, FileStatus::Processing);
    }

    #[test]
    fn test_batch_stats_and_listing() {
        let f = fixture(4);
        let claim = f
            .service
            .claim_batch(&f.alice, f.order_id, 3, &FileScope::Order)
            .unwrap()
            .unwrap();
        f.service
            .complete_file_in_batch(&f.alice, claim.id, f.file_ids[1])
            .unwrap();

        let stats = f.service.batch_stats(&f.alice, claim.id).unwrap();
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.completed_files, 1);
        assert_eq!(stats.pending_files, 2);
        assert_eq!(stats.progress_percentage, 33);

        let files = f.service.batch_files(&f.alice, claim.id).unwrap();
        let ids: Vec<i64> = files.iter().map(|r| r.id).collect();
        assert_eq!(ids, claim.file_ids);

        assert_eq!(f.service.user_active_batches(&f.alice).unwrap().len(), 1);
        assert!(f.service.user_active_batches(&f.bob).unwrap().is_empty());
    }

    fn block(f: &Fixture, trigger_sql: &str) {
        f.db.with_conn(|conn| Ok(conn.execute_batch(trigger_sql)?))
            .unwrap();
    }

    const BLOCK_ORDER_STATUS: &str = "CREATE TRIGGER block_order_status
        BEFORE UPDATE OF status ON orders
        BEGIN SELECT RAISE(ABORT, 'order status blocked'); END;";

    #[test]
    fn test_failed_claim_leaves_no_trace() {
        let f = fixture(3);
        // Fails after the claim row is inserted and the files are assigned.
        block(&f, BLOCK_ORDER_STATUS);

        let err = f
            .service
            .claim_batch(&f.alice, f.order_id, 2, &FileScope::Order)
            .unwrap_err();
        assert!(err.is_infrastructure());

        for id in &f.file_ids {
            let row = file(&f, *id);
            assert_eq!(row.status, FileStatus::Pending);
            assert!(row.assigned_to.is_none());
        }
        assert!(f.service.order_claims(&f.alice, f.order_id).unwrap().is_empty());
        assert_eq!(order_status(&f), OrderStatus::Pending);
    }

    #[test]
    fn test_failed_complete_rolls_back_files_and_claim() {
        let f = fixture(2);
        let claim = f
            .service
            .claim_batch(&f.alice, f.order_id, 2, &FileScope::Order)
            .unwrap()
            .unwrap();
        block(&f, BLOCK_ORDER_STATUS);

        let err = f.service.complete_batch(&f.alice, claim.id).unwrap_err();
        assert!(err.is_infrastructure());

        assert!(!f.service.find_claim(&f.alice, claim.id).unwrap().is_completed);
        for id in &f.file_ids {
            let row = file(&f, *id);
            assert_eq!(row.status, FileStatus::Claimed);
            assert!(!row.is_processed);
        }
        assert_eq!(order_status(&f), OrderStatus::InProgress);
    }

    #[test]
    fn test_failed_release_keeps_files_claimed() {
        let f = fixture(2);
        let claim = f
            .service
            .claim_batch(&f.alice, f.order_id, 2, &FileScope::Order)
            .unwrap()
            .unwrap();
        block(
            &f,
            "CREATE TRIGGER block_claim_delete BEFORE DELETE ON file_claims
             BEGIN SELECT RAISE(ABORT, 'claim delete blocked'); END;",
        );

        let err = f.service.release_batch(&f.alice, claim.id).unwrap_err();
        assert!(err.is_infrastructure());

        for id in &f.file_ids {
            let row = file(&f, *id);
            assert_eq!(row.status, FileStatus::Claimed);
            assert_eq!(row.assigned_to, Some(f.alice.user_id));
        }
        assert!(f.service.find_claim(&f.alice, claim.id).is_ok());
    }

    #[test]
    fn test_completing_file_left_processing_after_release() {
        let f = fixture(2);
        let claim = f
            .service
            .claim_batch(&f.alice, f.order_id, 2, &FileScope::Order)
            .unwrap()
            .unwrap();
        f.service
            .start_processing(&f.alice, claim.id, f.file_ids[0])
            .unwrap();
        assert_eq!(f.service.release_batch(&f.alice, claim.id).unwrap(), 1);

        let rest = f
            .service
            .claim_batch(&f.bob, f.order_id, 5, &FileScope::Order)
            .unwrap()
            .unwrap();
        assert_eq!(rest.file_ids, vec![f.file_ids[1]]);
        f.service.complete_batch(&f.bob, rest.id).unwrap();
        assert_eq!(order_status(&f), OrderStatus::InProgress);

        // Only the assignee may finish it.
        let err = f
            .service
            .update_file_status(&f.bob, f.file_ids[0], FileStatus::Completed)
            .unwrap_err();
        assert!(matches!(err, BatchError::NotAssignee { .. }));

        let done = f
            .service
            .update_file_status(&f.alice, f.file_ids[0], FileStatus::Completed)
            .unwrap();
        assert_eq!(done.status, FileStatus::Completed);
        assert!(done.is_processed);
        assert_eq!(order_status(&f), OrderStatus::Completed);
    }

    #[test]
    fn test_returning_file_to_pool() {
        let f = fixture(1);
        let claim = f
            .service
            .claim_batch(&f.alice, f.order_id, 1, &FileScope::Order)
            .unwrap()
            .unwrap();
        f.service
            .start_processing(&f.alice, claim.id, f.file_ids[0])
            .unwrap();

        let err = f
            .service
            .update_file_status(&f.alice, f.file_ids[0], FileStatus::Pending)
            .unwrap_err();
        assert!(matches!(
            err,
            BatchError::FileInOpenBatch { claim_id, .. } if claim_id == claim.id
        ));

        f.service.release_batch(&f.alice, claim.id).unwrap();
        let row = f
            .service
            .update_file_status(&f.alice, f.file_ids[0], FileStatus::Pending)
            .unwrap();
        assert_eq!(row.status, FileStatus::Pending);
        assert!(row.assigned_to.is_none());

        let again = f
            .service
            .claim_batch(&f.bob, f.order_id, 1, &FileScope::Order)
            .unwrap()
            .unwrap();
        assert_eq!(again.file_ids, f.file_ids);
    }

    #[test]
    fn test_completing_last_open_file_closes_its_claim() {
        let f = fixture(2);
        let claim = f
            .service
            .claim_batch(&f.alice, f.order_id, 2, &FileScope::Order)
            .unwrap()
            .unwrap();
        for id in &f.file_ids {
            f.service
                .update_file_status(&f.alice, *id, FileStatus::Completed)
                .unwrap();
        }
        assert!(f.service.find_claim(&f.alice, claim.id).unwrap().is_completed);
        assert_eq!(order_status(&f), OrderStatus::Completed);
    }

    #[test]
    fn test_update_file_status_rejections() {
        let f = fixture(2);
        let admin = Actor::new(f.alice.user_id, Role::Admin);

        // Pending files have no assignee; only order editors may touch them.
        let err = f
            .service
            .update_file_status(&f.alice, f.file_ids[0], FileStatus::Completed)
            .unwrap_err();
        assert!(matches!(err, BatchError::NotAssignee { .. }));

        for status in [FileStatus::Pending, FileStatus::Claimed, FileStatus::Processing] {
            let err = f
                .service
                .update_file_status(&admin, f.file_ids[0], status)
                .unwrap_err();
            assert!(matches!(err, BatchError::InvalidFileTransition { .. }));
        }

        let row = f
            .service
            .update_file_status(&admin, f.file_ids[0], FileStatus::Completed)
            .unwrap();
        assert_eq!(row.assigned_to, Some(admin.user_id));
        assert_eq!(order_status(&f), OrderStatus::Pending);

        assert!(matches!(
            f.service.update_file_status(&admin, 999, FileStatus::Completed),
            Err(BatchError::FileNotFound(999))
        ));
    }

    #[test]
    fn test_batch_stats_rounding() {
        assert_eq!(BatchStats::new(3, 2).progress_percentage, 67);
        assert_eq!(BatchStats::new(0, 0).progress_percentage, 0);
        assert_eq!(BatchStats::new(4, 4).pending_files, 0);
    }
}
