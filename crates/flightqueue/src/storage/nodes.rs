//! Row-per-node persistence of the linked list.
//!
//! Every list owns a head and a tail sentinel row plus one regular row per
//! queued flight, linked through `prev_id`/`next_id`. Removed regular rows
//! are never reused: they are marked inactive and keep their last links and
//! position as history.
//!
//! Structural writes stage the new or removed row first and rewrite the
//! neighbour links afterwards, so a failure part-way leaves no half-linked
//! node once the surrounding transaction rolls back.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::ordering;

use super::flights;

const COLUMNS: &str = "id, list_name, kind, flight_id, position, prev_id, next_id, active, \
                       version, created_at";

/// Role of a node row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Head sentinel.
    Head,
    /// Tail sentinel.
    Tail,
    /// Holds one flight.
    Regular,
}

impl NodeKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::Tail => "tail",
            Self::Regular => "regular",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRecord {
    /// Row id.
    pub id: i64,
    /// Owning list.
    pub list_name: String,
    /// Sentinel or regular.
    pub kind: NodeKind,
    /// Referenced flight, `None` for sentinels.
    pub flight_id: Option<i64>,
    /// Zero-based rank among active regular nodes, `None` for sentinels.
    pub position: Option<i64>,
    /// Predecessor row.
    pub prev_id: Option<i64>,
    /// Successor row.
    pub next_id: Option<i64>,
    /// Inactive rows are history.
    pub active: bool,
    /// Structure version the row belongs to.
    pub version: i64,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
}

/// Bookkeeping row for one list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListState {
    /// List name.
    pub name: String,
    /// Head sentinel row.
    pub head_id: i64,
    /// Tail sentinel row.
    pub tail_id: i64,
    /// Stored count of regular nodes.
    pub size: usize,
}

/// How a bounded traversal from the head ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkEnd {
    /// The tail sentinel was reached.
    Tail,
    /// A node was visited twice, or the step budget ran out.
    Cycle {
        /// The node reached a second time.
        at: i64,
    },
    /// A forward link was null or pointed at a missing row.
    Broken {
        /// Last node that was reached.
        last: i64,
    },
}

/// Result of [`walk`].
#[derive(Debug, Clone)]
pub struct Walk {
    /// Regular nodes reached from the head, in traversal order.
    pub nodes: Vec<NodeRecord>,
    /// How the traversal stopped.
    pub end: WalkEnd,
}

impl Walk {
    /// Whether the traversal reached the tail.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.end == WalkEnd::Tail
    }
}

fn to_sql_index(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Get the list state, creating the list and its linked sentinels on first use.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn ensure_list(conn: &Connection, name: &str) -> Result<ListState> {
    if let Some(state) = list_state(conn, name)? {
        return Ok(state);
    }

    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO nodes (list_name, kind, created_at) VALUES (?1, 'head', ?2)",
        params![name, now],
    )?;
    let head_id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO nodes (list_name, kind, prev_id, created_at) VALUES (?1, 'tail', ?2, ?3)",
        params![name, head_id, now],
    )?;
    let tail_id = conn.last_insert_rowid();
    set_next(conn, head_id, Some(tail_id))?;

    conn.execute(
        "INSERT INTO list_state (name, head_id, tail_id, size) VALUES (?1, ?2, ?3, 0)",
        params![name, head_id, tail_id],
    )?;

    info!(list = name, head_id, tail_id, "created list");
    Ok(ListState {
        name: name.to_string(),
        head_id,
        tail_id,
        size: 0,
    })
}

/// Get the list state if the list exists.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn list_state(conn: &Connection, name: &str) -> Result<Option<ListState>> {
    let state = conn
        .query_row(
            "SELECT name, head_id, tail_id, size FROM list_state WHERE name = ?1",
            [name],
            |row| {
                let size: i64 = row.get(3)?;
                Ok(ListState {
                    name: row.get(0)?,
                    head_id: row.get(1)?,
                    tail_id: row.get(2)?,
                    size: usize::try_from(size).unwrap_or(0),
                })
            },
        )
        .optional()?;
    Ok(state)
}

/// Get the list state or fail with [`Error::NotFound`].
///
/// # Errors
///
/// Returns [`Error::NotFound`] if the list has not been created.
pub fn require_list(conn: &Connection, name: &str) -> Result<ListState> {
    list_state(conn, name)?.ok_or_else(|| Error::list_not_found(name))
}

/// Get a node by id.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn get_node(conn: &Connection, id: i64) -> Result<Option<NodeRecord>> {
    let node = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM nodes WHERE id = ?1"),
            [id],
            row_to_node,
        )
        .optional()?;
    Ok(node)
}

fn require_node(conn: &Connection, id: i64) -> Result<NodeRecord> {
    get_node(conn, id)?.ok_or_else(|| Error::node_not_found(id))
}

/// Number of active regular rows in a list.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn count_active(conn: &Connection, list: &str) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM nodes WHERE list_name = ?1 AND kind = 'regular' AND active = 1",
        [list],
        |row| row.get(0),
    )?;
    Ok(usize::try_from(count).unwrap_or(0))
}

/// Bounded traversal from the head following `next_id`.
///
/// At most `max(size, active rows) + 2` steps are taken, and revisiting a
/// node ends the walk, so corrupted links can never loop forever.
///
/// # Errors
///
/// Returns an error if the head row is missing or a query fails.
pub fn walk(conn: &Connection, state: &ListState) -> Result<Walk> {
    let head = require_node(conn, state.head_id)?;
    let budget = state.size.max(count_active(conn, &state.name)?) + 2;

    let mut visited = HashSet::from([head.id]);
    let mut nodes = Vec::new();
    let mut last = head.id;
    let mut cursor = head.next_id;

    for _ in 0..budget {
        let Some(id) = cursor else {
            return Ok(Walk {
                nodes,
                end: WalkEnd::Broken { last },
            });
        };
        if id == state.tail_id {
            return Ok(Walk {
                nodes,
                end: WalkEnd::Tail,
            });
        }
        if !visited.insert(id) {
            return Ok(Walk {
                nodes,
                end: WalkEnd::Cycle { at: id },
            });
        }
        let Some(node) = get_node(conn, id)? else {
            return Ok(Walk {
                nodes,
                end: WalkEnd::Broken { last },
            });
        };
        last = node.id;
        cursor = node.next_id;
        nodes.push(node);
    }

    Ok(Walk {
        nodes,
        end: WalkEnd::Cycle { at: last },
    })
}

/// Active regular nodes from head to tail.
///
/// # Errors
///
/// Returns [`Error::IntegrityViolation`] if the traversal does not reach the
/// tail.
pub fn active_chain(conn: &Connection, state: &ListState) -> Result<Vec<NodeRecord>> {
    let walk = walk(conn, state)?;
    match walk.end {
        WalkEnd::Tail => Ok(walk.nodes.into_iter().filter(|n| n.active).collect()),
        WalkEnd::Cycle { at } => Err(Error::integrity(format!(
            "cycle in list {} at node {at}",
            state.name
        ))),
        WalkEnd::Broken { last } => Err(Error::integrity(format!(
            "forward link of node {last} in list {} does not reach the tail",
            state.name
        ))),
    }
}

/// Flight ids of the active chain, in order.
///
/// # Errors
///
/// Returns [`Error::IntegrityViolation`] if the chain is broken.
pub fn flight_order(conn: &Connection, state: &ListState) -> Result<Vec<i64>> {
    Ok(active_chain(conn, state)?
        .into_iter()
        .filter_map(|n| n.flight_id)
        .collect())
}

/// The active regular node at `position`.
///
/// Looks the stored position up first and falls back to traversal when that
/// value is stale.
///
/// # Errors
///
/// Returns [`Error::InvalidRange`] if `position >= size`.
pub fn node_at(conn: &Connection, state: &ListState, position: usize) -> Result<NodeRecord> {
    if position >= state.size {
        return Err(Error::InvalidRange {
            position,
            len: state.size,
        });
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM nodes \
         WHERE list_name = ?1 AND kind = 'regular' AND active = 1 AND position = ?2"
    ))?;
    let matches = stmt
        .query_map(params![state.name, to_sql_index(position)], row_to_node)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if let [node] = matches.as_slice() {
        return Ok(node.clone());
    }

    debug!(position, list = %state.name, "stored position is stale, traversing");
    active_chain(conn, state)?
        .into_iter()
        .nth(position)
        .ok_or(Error::InvalidRange {
            position,
            len: state.size,
        })
}

/// Queue `flight_id` so that its node ends up at `position`.
///
/// # Errors
///
/// Returns [`Error::InvalidRange`] if `position > size`, and
/// [`Error::AlreadyQueued`] if an active node already references the flight.
pub fn insert_at(
    conn: &Connection,
    state: &mut ListState,
    flight_id: i64,
    position: usize,
) -> Result<NodeRecord> {
    if position > state.size {
        return Err(Error::InvalidRange {
            position,
            len: state.size,
        });
    }
    if flights::is_referenced(conn, flight_id)? {
        return Err(Error::AlreadyQueued { flight_id });
    }

    let successor = if position == state.size {
        state.tail_id
    } else {
        node_at(conn, state, position)?.id
    };
    let predecessor = require_node(conn, successor)?
        .prev_id
        .ok_or_else(|| Error::integrity(format!("node {successor} has no predecessor")))?;

    conn.execute(
        "UPDATE nodes SET position = position + 1 \
         WHERE list_name = ?1 AND kind = 'regular' AND active = 1 AND position >= ?2",
        params![state.name, to_sql_index(position)],
    )?;
    conn.execute(
        r"
        INSERT INTO nodes (list_name, kind, flight_id, position, prev_id, next_id, version, created_at)
        VALUES (?1, 'regular', ?2, ?3, ?4, ?5, ?6, ?7)
        ",
        params![
            state.name,
            flight_id,
            to_sql_index(position),
            predecessor,
            successor,
            current_version(conn, &state.name)?,
            Utc::now().to_rfc3339(),
        ],
    )?;
    let id = conn.last_insert_rowid();

    set_next(conn, predecessor, Some(id))?;
    set_prev(conn, successor, Some(id))?;
    let size = state.size + 1;
    set_size(conn, state, size)?;

    debug!(node_id = id, flight_id, position, "inserted node");
    require_node(conn, id)
}

/// Unlink the node at `position` and keep it as an inactive history row.
///
/// # Errors
///
/// Returns [`Error::InvalidRange`] if `position >= size`.
pub fn extract_at(conn: &Connection, state: &mut ListState, position: usize) -> Result<NodeRecord> {
    let mut node = node_at(conn, state, position)?;
    let (prev, next) = neighbours(&node)?;

    conn.execute("UPDATE nodes SET active = 0 WHERE id = ?1", [node.id])?;
    set_next(conn, prev, Some(next))?;
    set_prev(conn, next, Some(prev))?;
    conn.execute(
        "UPDATE nodes SET position = position - 1 \
         WHERE list_name = ?1 AND kind = 'regular' AND active = 1 AND position > ?2",
        params![state.name, to_sql_index(position)],
    )?;
    let size = state.size.saturating_sub(1);
    set_size(conn, state, size)?;

    debug!(node_id = node.id, position, "extracted node");
    node.active = false;
    Ok(node)
}

/// Relink the node at `from` so that it lands at `to`.
///
/// The row keeps its id; its version is bumped.
///
/// # Errors
///
/// Returns [`Error::InvalidMove`] when either index is out of range or they
/// are equal.
pub fn move_node(conn: &Connection, state: &ListState, from: usize, to: usize) -> Result<()> {
    if from >= state.size || to >= state.size || from == to {
        return Err(Error::InvalidMove {
            from,
            to,
            len: state.size,
        });
    }

    let mut chain: Vec<i64> = active_chain(conn, state)?.iter().map(|n| n.id).collect();
    if chain.len() != state.size {
        return Err(Error::integrity(format!(
            "list {} holds {} nodes but records size {}",
            state.name,
            chain.len(),
            state.size
        )));
    }
    let node = require_node(conn, chain[from])?;
    let (old_prev, old_next) = neighbours(&node)?;

    chain.remove(from);
    chain.insert(to, node.id);
    let new_prev = if to == 0 { state.head_id } else { chain[to - 1] };
    let new_next = chain.get(to + 1).copied().unwrap_or(state.tail_id);

    set_next(conn, old_prev, Some(old_next))?;
    set_prev(conn, old_next, Some(old_prev))?;
    conn.execute(
        "UPDATE nodes SET prev_id = ?1, next_id = ?2, version = version + 1 WHERE id = ?3",
        params![new_prev, new_next, node.id],
    )?;
    set_next(conn, new_prev, Some(node.id))?;
    set_prev(conn, new_next, Some(node.id))?;
    recompute_positions(conn, state)?;

    debug!(node_id = node.id, from, to, "moved node");
    Ok(())
}

/// Stable re-sort of the active chain by the queue ordering policy.
///
/// Rows are relinked in place; no row is created. Returns whether the order
/// changed.
///
/// # Errors
///
/// Returns an error if the chain is broken or references a missing flight.
pub fn reorder(conn: &Connection, state: &ListState) -> Result<bool> {
    let chain = active_chain(conn, state)?;
    let mut entries = Vec::with_capacity(chain.len());
    for node in chain {
        let flight_id = node
            .flight_id
            .ok_or_else(|| Error::integrity(format!("regular node {} has no flight", node.id)))?;
        entries.push((node.id, flights::require(conn, flight_id)?));
    }

    let before: Vec<i64> = entries.iter().map(|(id, _)| *id).collect();
    entries.sort_by(|(_, a), (_, b)| ordering::queue_order(a, b));
    let after: Vec<i64> = entries.iter().map(|(id, _)| *id).collect();
    if before == after {
        return Ok(false);
    }

    relink(conn, state, &after)?;
    info!(list = %state.name, nodes = after.len(), "reordered list");
    Ok(true)
}

/// Replace the active chain with fresh rows for `flight_ids`, in order.
///
/// Active regular rows become history. The new rows share a new version
/// (highest so far plus one); `prev` links are set while creating, `next`
/// links once every row exists, then the sentinels are reattached. Returns
/// the new version.
///
/// # Errors
///
/// Returns an error if a database operation fails.
pub fn rebuild(conn: &Connection, state: &mut ListState, flight_ids: &[i64]) -> Result<i64> {
    let version = current_version(conn, &state.name)? + 1;
    conn.execute(
        "UPDATE nodes SET active = 0 WHERE list_name = ?1 AND kind = 'regular' AND active = 1",
        [&state.name],
    )?;

    let now = Utc::now().to_rfc3339();
    let mut created = Vec::with_capacity(flight_ids.len());
    let mut prev = state.head_id;
    for (position, flight_id) in flight_ids.iter().enumerate() {
        conn.execute(
            r"
            INSERT INTO nodes (list_name, kind, flight_id, position, prev_id, version, created_at)
            VALUES (?1, 'regular', ?2, ?3, ?4, ?5, ?6)
            ",
            params![state.name, flight_id, to_sql_index(position), prev, version, now],
        )?;
        prev = conn.last_insert_rowid();
        created.push(prev);
    }
    for pair in created.windows(2) {
        set_next(conn, pair[0], Some(pair[1]))?;
    }
    if let Some(&last) = created.last() {
        set_next(conn, last, Some(state.tail_id))?;
    }

    conn.execute(
        "UPDATE nodes SET version = ?1 WHERE id IN (?2, ?3)",
        params![version, state.head_id, state.tail_id],
    )?;
    set_next(conn, state.head_id, Some(created.first().copied().unwrap_or(state.tail_id)))?;
    set_prev(conn, state.tail_id, Some(prev))?;
    set_size(conn, state, created.len())?;

    info!(list = %state.name, version, nodes = created.len(), "rebuilt list");
    Ok(version)
}

/// Which link of a node was rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// The `next_id` column.
    Next,
    /// The `prev_id` column.
    Prev,
}

/// A link rewritten by [`rebuild_sentinel_links`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relink {
    /// Node whose link changed.
    pub node_id: i64,
    /// Which link changed.
    pub link: Link,
    /// Previous value.
    pub was: Option<i64>,
    /// New value; `None` when an outward sentinel link was cleared.
    pub now: Option<i64>,
}

/// Restore the sentinel ends of the chain.
///
/// Clears any link pointing outward from a sentinel and makes the last node
/// reached from the head point at the tail and vice versa. Returns the links
/// rewritten; a second call returns none.
///
/// # Errors
///
/// Returns [`Error::IntegrityViolation`] when the traversal hits a cycle.
pub fn rebuild_sentinel_links(conn: &Connection, state: &ListState) -> Result<Vec<Relink>> {
    let mut rewritten = Vec::new();

    let head = require_node(conn, state.head_id)?;
    if head.prev_id.is_some() {
        set_prev(conn, head.id, None)?;
        rewritten.push(Relink {
            node_id: head.id,
            link: Link::Prev,
            was: head.prev_id,
            now: None,
        });
    }
    let tail = require_node(conn, state.tail_id)?;
    if tail.next_id.is_some() {
        set_next(conn, tail.id, None)?;
        rewritten.push(Relink {
            node_id: tail.id,
            link: Link::Next,
            was: tail.next_id,
            now: None,
        });
    }

    let walk = walk(conn, state)?;
    let last = match walk.end {
        WalkEnd::Cycle { at } => {
            return Err(Error::integrity(format!(
                "cycle in list {} at node {at}",
                state.name
            )))
        }
        WalkEnd::Tail => walk.nodes.last().map_or(state.head_id, |n| n.id),
        WalkEnd::Broken { last } => {
            let was = require_node(conn, last)?.next_id;
            set_next(conn, last, Some(state.tail_id))?;
            rewritten.push(Relink {
                node_id: last,
                link: Link::Next,
                was,
                now: Some(state.tail_id),
            });
            last
        }
    };

    if tail.prev_id != Some(last) {
        set_prev(conn, state.tail_id, Some(last))?;
        rewritten.push(Relink {
            node_id: state.tail_id,
            link: Link::Prev,
            was: tail.prev_id,
            now: Some(last),
        });
    }
    Ok(rewritten)
}

/// Rewrite `position` of every active node to its traversal rank and fix
/// the stored size.
///
/// Returns the number of values changed; a second call returns 0.
///
/// # Errors
///
/// Returns [`Error::IntegrityViolation`] if the chain is broken.
pub fn recompute_positions(conn: &Connection, state: &ListState) -> Result<usize> {
    let chain = active_chain(conn, state)?;
    let mut changed = 0;
    for (rank, node) in chain.iter().enumerate() {
        let rank = to_sql_index(rank);
        if node.position != Some(rank) {
            conn.execute("UPDATE nodes SET position = ?1 WHERE id = ?2", params![rank, node.id])?;
            changed += 1;
        }
    }
    if chain.len() != state.size {
        conn.execute(
            "UPDATE list_state SET size = ?1 WHERE name = ?2",
            params![to_sql_index(chain.len()), state.name],
        )?;
        changed += 1;
    }
    Ok(changed)
}

/// Regular rows of a list, active and historical, ordered by version and
/// position. Restricted to one flight when `flight_id` is given.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn history(conn: &Connection, list: &str, flight_id: Option<i64>) -> Result<Vec<NodeRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM nodes \
         WHERE list_name = ?1 AND kind = 'regular' AND (?2 IS NULL OR flight_id = ?2) \
         ORDER BY version, position, id"
    ))?;
    let nodes = stmt
        .query_map(params![list, flight_id], row_to_node)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(nodes)
}

/// Point the chain at exactly `ids`, in order, with matching positions.
fn relink(conn: &Connection, state: &ListState, ids: &[i64]) -> Result<()> {
    for (rank, id) in ids.iter().enumerate() {
        let prev = if rank == 0 { state.head_id } else { ids[rank - 1] };
        let next = ids.get(rank + 1).copied().unwrap_or(state.tail_id);
        conn.execute(
            "UPDATE nodes SET prev_id = ?1, next_id = ?2, position = ?3 WHERE id = ?4",
            params![prev, next, to_sql_index(rank), id],
        )?;
    }
    set_next(conn, state.head_id, Some(ids.first().copied().unwrap_or(state.tail_id)))?;
    set_prev(conn, state.tail_id, Some(ids.last().copied().unwrap_or(state.head_id)))?;
    Ok(())
}

fn neighbours(node: &NodeRecord) -> Result<(i64, i64)> {
    match (node.prev_id, node.next_id) {
        (Some(prev), Some(next)) => Ok((prev, next)),
        _ => Err(Error::integrity(format!(
            "node {} is missing a neighbour link",
            node.id
        ))),
    }
}

fn current_version(conn: &Connection, list: &str) -> Result<i64> {
    let version: Option<i64> = conn.query_row(
        "SELECT MAX(version) FROM nodes WHERE list_name = ?1",
        [list],
        |row| row.get(0),
    )?;
    Ok(version.unwrap_or(1))
}

pub(crate) fn set_next(conn: &Connection, id: i64, next: Option<i64>) -> Result<()> {
    conn.execute("UPDATE nodes SET next_id = ?1 WHERE id = ?2", params![next, id])?;
    Ok(())
}

pub(crate) fn set_prev(conn: &Connection, id: i64, prev: Option<i64>) -> Result<()> {
    conn.execute("UPDATE nodes SET prev_id = ?1 WHERE id = ?2", params![prev, id])?;
    Ok(())
}

pub(crate) fn set_size(conn: &Connection, state: &mut ListState, size: usize) -> Result<()> {
    conn.execute(
        "UPDATE list_state SET size = ?1 WHERE name = ?2",
        params![to_sql_index(size), state.name],
    )?;
    state.size = size;
    Ok(())
}

fn row_to_node(row: &Row<'_>) -> rusqlite::Result<NodeRecord> {
    let kind: String = row.get(2)?;
    let kind = match kind.as_str() {
        "head" => NodeKind::Head,
        "tail" => NodeKind::Tail,
        "regular" => NodeKind::Regular,
        other => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("unknown node kind: {other}").into(),
            ))
        }
    };
    let created_at: String = row.get(9)?;
    Ok(NodeRecord {
        id: row.get(0)?,
        list_name: row.get(1)?,
        kind,
        flight_id: row.get(3)?,
        position: row.get(4)?,
        prev_id: row.get(5)?,
        next_id: row.get(6)?,
        active: row.get(7)?,
        version: row.get(8)?,
        created_at: flights::parse_timestamp(9, &created_at)?,
    })
}
