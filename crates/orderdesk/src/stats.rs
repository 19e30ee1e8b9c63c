//! Hierarchical file statistics for an order.
//!
//! Counts roll up from subfolders into their folder, and from folders and
//! loose (unfiled) files into the order. The roll-up is read-only.

use std::collections::{HashMap, HashSet};
use std::ops::AddAssign;

use rusqlite::Connection;
use serde::Serialize;

use crate::db::folder_repo::{self, FolderRow, SubfolderRow};
use crate::db::stats_repo::{self, LocationCount};
use crate::db::DatabaseError;
use crate::status::FileStatus;

/// Per-status file counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub pending: u64,
    pub claimed: u64,
    pub processing: u64,
    pub completed: u64,
    pub total: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: FileStatus, count: u64) {
        match status {
            FileStatus::Pending => self.pending += count,
            FileStatus::Claimed => self.claimed += count,
            FileStatus::Processing => self.processing += count,
            FileStatus::Completed => self.completed += count,
        }
        self.total += count;
    }

    pub fn get(&self, status: FileStatus) -> u64 {
        match status {
            FileStatus::Pending => self.pending,
            FileStatus::Claimed => self.claimed,
            FileStatus::Processing => self.processing,
            FileStatus::Completed => self.completed,
        }
    }

    /// Claimed plus processing.
    pub fn in_flight(&self) -> u64 {
        self.claimed + self.processing
    }

    /// True when there is at least one file and every file is completed.
    pub fn is_completed(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}

impl AddAssign for StatusCounts {
    fn add_assign(&mut self, other: Self) {
        self.pending += other.pending;
        self.claimed += other.claimed;
        self.processing += other.processing;
        self.completed += other.completed;
        self.total += other.total;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubfolderStats {
    pub subfolder_id: i64,
    pub name: String,
    pub counts: StatusCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderStats {
    pub folder_id: i64,
    pub name: String,
    /// Files placed directly in the folder.
    pub direct: StatusCounts,
    pub subfolders: Vec<SubfolderStats>,
    /// `direct` plus every subfolder.
    pub total: StatusCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStats {
    pub order_id: i64,
    /// Files with no folder.
    pub unfiled: StatusCounts,
    pub folders: Vec<FolderStats>,
    /// `unfiled` plus every folder total.
    pub totals: StatusCounts,
    pub is_completed: bool,
}

impl OrderStats {
    pub fn is_completed(&self) -> bool {
        self.is_completed
    }
}

/// Loads and aggregates the statistics of one order.
pub fn order_stats(conn: &Connection, order_id: i64) -> Result<OrderStats, DatabaseError> {
    let folders = folder_repo::list_folders(conn, order_id)?;
    let subfolders = folder_repo::list_subfolders_for_order(conn, order_id)?;
    let counts = stats_repo::counts_by_location(conn, order_id)?;
    Ok(aggregate(order_id, &folders, &subfolders, &counts))
}

/// Rolls grouped counts up the folder tree.
///
/// A count is attributed to its subfolder when it has one (the subfolder
/// determines the folder), else to its folder, else to `unfiled`. Counts
/// pointing at folders that are not in `folders` land in `unfiled`, so
/// `totals` always equals the sum of every input count.
pub fn aggregate(
    order_id: i64,
    folders: &[FolderRow],
    subfolders: &[SubfolderRow],
    counts: &[LocationCount],
) -> OrderStats {
    let mut unfiled = StatusCounts::default();
    let mut direct: HashMap<i64, StatusCounts> = HashMap::new();
    let mut nested: HashMap<i64, StatusCounts> = HashMap::new();

    let folder_ids: HashSet<i64> = folders.iter().map(|f| f.id).collect();
    let parent_of: HashMap<i64, i64> = subfolders.iter().map(|s| (s.id, s.folder_id)).collect();

    for entry in counts {
        match (entry.folder_id, entry.subfolder_id) {
            (_, Some(subfolder_id))
                if parent_of
                    .get(&subfolder_id)
                    .is_some_and(|folder| folder_ids.contains(folder)) =>
            {
                nested
                    .entry(subfolder_id)
                    .or_default()
                    .add(entry.status, entry.count);
            }
            (Some(folder_id), None) if folder_ids.contains(&folder_id) => {
                direct
                    .entry(folder_id)
                    .or_default()
                    .add(entry.status, entry.count);
            }
            _ => unfiled.add(entry.status, entry.count),
        }
    }

    let mut totals = unfiled;
    let folders: Vec<FolderStats> = folders
        .iter()
        .map(|folder| {
            let direct_counts = direct.get(&folder.id).copied().unwrap_or_default();
            let mut total = direct_counts;
            let subfolders: Vec<SubfolderStats> = subfolders
                .iter()
                .filter(|s| s.folder_id == folder.id)
                .map(|s| {
                    let counts = nested.get(&s.id).copied().unwrap_or_default();
                    total += counts;
                    SubfolderStats {
                        subfolder_id: s.id,
                        name: s.name.clone(),
                        counts,
                    }
                })
                .collect();
            totals += total;
            FolderStats {
                folder_id: folder.id,
                name: folder.name.clone(),
                direct: direct_counts,
                subfolders,
                total,
            }
        })
        .collect();

    OrderStats {
        order_id,
        unfiled,
        folders,
        totals,
        is_completed: totals.is_completed(),
    }
}
