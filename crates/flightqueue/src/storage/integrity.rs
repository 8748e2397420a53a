//! Traversal-based integrity check and repair for a persisted list.
//!
//! Running the check on a healthy list changes nothing, and running it twice
//! in a row never reports repairs the second time.

use std::collections::HashSet;
use std::fmt;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{error, info};

use crate::error::Result;

use super::nodes::{self, Link, NodeRecord, Relink, WalkEnd};

/// One fix applied by [`check_and_repair`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "repair", rename_all = "snake_case")]
pub enum Repair {
    /// A forward link was null, dangling or skipped an active node's
    /// successor, and was rewritten.
    ForwardLink {
        /// Node whose `next_id` changed.
        node_id: i64,
        /// Previous value.
        was: Option<i64>,
        /// New value.
        now: i64,
    },
    /// A backward link disagreed with the actual predecessor.
    BackwardLink {
        /// Node whose `prev_id` changed.
        node_id: i64,
        /// Previous value.
        was: Option<i64>,
        /// New value.
        now: i64,
    },
    /// A sentinel pointed outward and was cleared.
    SentinelLink {
        /// The sentinel row.
        node_id: i64,
    },
    /// An active node could not be reached from the head and was retired.
    Detached {
        /// The unreachable row, now inactive.
        node_id: i64,
    },
    /// The stored size disagreed with the traversal count.
    Size {
        /// Stored value.
        was: usize,
        /// Counted value.
        now: usize,
    },
    /// Stored positions disagreed with traversal ranks.
    Positions {
        /// Number of rows rewritten.
        count: usize,
    },
}

impl fmt::Display for Repair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ForwardLink { node_id, was, now } => {
                write!(f, "node {node_id}: next {was:?} -> {now}")
            }
            Self::BackwardLink { node_id, was, now } => {
                write!(f, "node {node_id}: prev {was:?} -> {now}")
            }
            Self::SentinelLink { node_id } => write!(f, "sentinel {node_id}: outward link cleared"),
            Self::Detached { node_id } => write!(f, "node {node_id}: unreachable, retired"),
            Self::Size { was, now } => write!(f, "size {was} -> {now}"),
            Self::Positions { count } => write!(f, "{count} positions recomputed"),
        }
    }
}

impl From<Relink> for Repair {
    fn from(relink: Relink) -> Self {
        match (relink.link, relink.now) {
            (_, None) => Self::SentinelLink {
                node_id: relink.node_id,
            },
            (Link::Next, Some(now)) => Self::ForwardLink {
                node_id: relink.node_id,
                was: relink.was,
                now,
            },
            (Link::Prev, Some(now)) => Self::BackwardLink {
                node_id: relink.node_id,
                was: relink.was,
                now,
            },
        }
    }
}

/// Outcome of one integrity pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    /// Fixes applied, in order.
    pub repairs: Vec<Repair>,
    /// Nodes reached from the head.
    pub counted: usize,
    /// Whether the traversal ran into a cycle and was aborted.
    pub cycle_detected: bool,
}

impl IntegrityReport {
    /// No repairs and no cycle.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.repairs.is_empty() && !self.cycle_detected
    }
}

/// Traverse the list from its head and repair what can be repaired.
///
/// The sentinel ends are restored first with
/// [`nodes::rebuild_sentinel_links`], so a null or dangling link is
/// reattached to the tail. Forward links are then rewritten to form the
/// chain of active nodes actually reached, backward links are rewritten to
/// match, then the stored size and positions are corrected. A cycle aborts
/// the pass with `cycle_detected` set before anything is written.
///
/// # Errors
///
/// Returns an error if the list does not exist or a query fails.
pub fn check_and_repair(conn: &Connection, list: &str) -> Result<IntegrityReport> {
    let mut state = nodes::require_list(conn, list)?;
    let mut report = IntegrityReport::default();

    let walk = nodes::walk(conn, &state)?;
    if let WalkEnd::Cycle { at } = walk.end {
        error!(list, node_id = at, reached = walk.nodes.len(), "cycle in list, repair aborted");
        report.counted = walk.nodes.len();
        report.cycle_detected = true;
        return Ok(report);
    }

    for relink in nodes::rebuild_sentinel_links(conn, &state)? {
        report.repairs.push(Repair::from(relink));
    }
    let walk = if walk.is_complete() {
        walk
    } else {
        nodes::walk(conn, &state)?
    };

    let kept: Vec<_> = walk.nodes.into_iter().filter(|n| n.active).collect();
    report.counted = kept.len();

    let mut chain = Vec::with_capacity(kept.len() + 2);
    chain.push((state.head_id, nodes::get_node(conn, state.head_id)?.and_then(|n| n.next_id)));
    chain.extend(kept.iter().map(|n| (n.id, n.next_id)));
    for window in chain.windows(2) {
        let (id, next) = window[0];
        let (successor, _) = window[1];
        relink_forward(conn, &mut report, id, next, successor)?;
    }
    let (last, last_next) = chain[chain.len() - 1];
    relink_forward(conn, &mut report, last, last_next, state.tail_id)?;

    let mut prev = state.head_id;
    for node in &kept {
        relink_backward(conn, &mut report, node.id, node.prev_id, prev)?;
        prev = node.id;
    }
    let tail_prev = nodes::get_node(conn, state.tail_id)?.and_then(|n| n.prev_id);
    relink_backward(conn, &mut report, state.tail_id, tail_prev, prev)?;

    for node_id in unreachable_active(conn, list, &kept)? {
        conn.execute("UPDATE nodes SET active = 0 WHERE id = ?1", [node_id])?;
        report.repairs.push(Repair::Detached { node_id });
    }

    if state.size != kept.len() {
        report.repairs.push(Repair::Size {
            was: state.size,
            now: kept.len(),
        });
        nodes::set_size(conn, &mut state, kept.len())?;
    }

    let count = nodes::recompute_positions(conn, &state)?;
    if count > 0 {
        report.repairs.push(Repair::Positions { count });
    }

    if report.is_clean() {
        return Ok(report);
    }
    for repair in &report.repairs {
        info!(list, %repair, "integrity repair");
    }
    Ok(report)
}

fn unreachable_active(conn: &Connection, list: &str, kept: &[NodeRecord]) -> Result<Vec<i64>> {
    let reached: HashSet<i64> = kept.iter().map(|n| n.id).collect();
    let mut stmt = conn.prepare(
        "SELECT id FROM nodes WHERE list_name = ?1 AND kind = 'regular' AND active = 1 ORDER BY id",
    )?;
    let ids = stmt
        .query_map([list], |row| row.get::<_, i64>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids.into_iter().filter(|id| !reached.contains(id)).collect())
}

fn relink_forward(
    conn: &Connection,
    report: &mut IntegrityReport,
    node_id: i64,
    was: Option<i64>,
    now: i64,
) -> Result<()> {
    if was != Some(now) {
        nodes::set_next(conn, node_id, Some(now))?;
        report.repairs.push(Repair::ForwardLink { node_id, was, now });
    }
    Ok(())
}

fn relink_backward(
    conn: &Connection,
    report: &mut IntegrityReport,
    node_id: i64,
    was: Option<i64>,
    now: i64,
) -> Result<()> {
    if was != Some(now) {
        nodes::set_prev(conn, node_id, Some(now))?;
        report.repairs.push(Repair::BackwardLink { node_id, was, now });
    }
    Ok(())
}
