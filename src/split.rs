use chrono::NaiveDate;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ledger_store::LedgerStore;

/// Character that marks a counterparty name as part of a split group.
pub const GROUP_DELIMITER: char = '/';

/// Cell date renderings tolerated by the grouping policy. Rows written by
/// this crate use the first form; rows entered by hand may use the others.
const CELL_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y"];

/// Inclusive row range touched by a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub start: usize,
    pub end: usize,
}

fn parse_cell_date(raw: &str) -> Option<NaiveDate> {
    let text = raw.trim();
    CELL_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}

/// Date cells are equal when the strings match or both parse to the same
/// day under any tolerated rendering.
pub fn dates_match(a: &str, b: &str) -> bool {
    if a.trim() == b.trim() {
        return true;
    }
    match (parse_cell_date(a), parse_cell_date(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// The row-grouping equality policy: dates must match; names match exactly,
/// or by their prefix before the group delimiter, or by the leading third
/// (in chars, of the shorter name, at least one) of both.
pub fn same_transaction(a_date: &str, a_name: &str, b_date: &str, b_name: &str) -> bool {
    if !dates_match(a_date, b_date) {
        return false;
    }
    let a_name = a_name.trim();
    let b_name = b_name.trim();
    if a_name.is_empty() || b_name.is_empty() {
        return false;
    }
    if a_name == b_name {
        return true;
    }
    let a_prefix = a_name
        .split(GROUP_DELIMITER)
        .next()
        .unwrap_or_default()
        .trim();
    let b_prefix = b_name
        .split(GROUP_DELIMITER)
        .next()
        .unwrap_or_default()
        .trim();
    if !a_prefix.is_empty() && a_prefix == b_prefix {
        return true;
    }
    let a_chars: Vec<char> = a_name.chars().collect();
    let b_chars: Vec<char> = b_name.chars().collect();
    let third = a_chars.len().min(b_chars.len()) / 3;
    third > 0 && a_chars[..third] == b_chars[..third]
}

fn is_difference_expr(cost: &str) -> bool {
    cost.starts_with('=') && cost[1..].contains('-')
}

/// Splits the entry at `row` into two allocations.
///
/// The group of adjacent rows equal to the target is located, the target's
/// cost becomes a difference expression, and a new trailing row is opened
/// with a tax-multiplier expression over a zero base for the user to fill
/// in. Occupied rows after the group shift down one to make room. Every
/// precondition is checked before the first write, so a failure leaves the
/// partition untouched.
pub fn split_entry(
    store: &dyn LedgerStore,
    config: &Config,
    partition: &str,
    row: usize,
) -> Result<RowRange> {
    let s = &config.settings;
    if row < s.window_start_row || row > s.window_end_row() {
        return Err(Error::Config(format!(
            "row {row} is outside the transaction window ({}..={})",
            s.window_start_row,
            s.window_end_row()
        )));
    }

    let span_cols = s.type_col() - s.date_col + 1;
    let block = store.read_rows(
        partition,
        s.window_start_row,
        s.window_rows,
        s.date_col,
        span_cols,
    )?;
    let category_off = s.category_col() - s.date_col;
    let type_off = s.type_col() - s.date_col;
    let row_is_empty =
        |r: &[String]| r[0].trim().is_empty() && r[1].trim().is_empty() && r[2].trim().is_empty();

    let idx = row - s.window_start_row;
    let head = &block[idx];
    if row_is_empty(head) {
        return Err(Error::EmptySplitTarget(row));
    }

    let mut group_end = idx;
    while group_end + 1 < block.len() {
        let next = &block[group_end + 1];
        if !row_is_empty(next) && same_transaction(&head[0], &head[1], &next[0], &next[1]) {
            group_end += 1;
        } else {
            break;
        }
    }

    // an equal predecessor means the target sits mid-group
    if idx > 0 {
        let prev = &block[idx - 1];
        if !row_is_empty(prev) && same_transaction(&head[0], &head[1], &prev[0], &prev[1]) {
            return Err(Error::AlreadySplit(row));
        }
    }

    let slot_idx = group_end + 1;
    if slot_idx >= block.len() {
        return Err(Error::WindowFull {
            partition: partition.to_string(),
            needed: 1,
        });
    }
    let empty_idx = block
        .iter()
        .enumerate()
        .skip(slot_idx)
        .find(|(_, r)| row_is_empty(r))
        .map(|(i, _)| i)
        .ok_or_else(|| Error::WindowFull {
            partition: partition.to_string(),
            needed: 1,
        })?;

    // replacement values, all derived before any write
    let head_cost = head[2].trim();
    let head_cost = if is_difference_expr(head_cost) {
        head_cost.to_string()
    } else {
        format!("={head_cost}-0")
    };
    let head_name = if head[1].contains(GROUP_DELIMITER) {
        head[1].trim().to_string()
    } else {
        format!("{}{GROUP_DELIMITER}", head[1].trim())
    };
    let new_cost = format!("=0*{}", s.tax_multiplier);
    let head_date = head[0].clone();
    let category = head[category_off].clone();
    let row_type = head[type_off].clone();

    if empty_idx > slot_idx {
        for i in (slot_idx..empty_idx).rev() {
            store.copy_row(
                partition,
                s.window_start_row + i,
                s.window_start_row + i + 1,
                s.date_col,
                span_cols,
            )?;
        }
        store.clear_row(partition, s.window_start_row + slot_idx, s.date_col, span_cols)?;
    }

    let slot_row = s.window_start_row + slot_idx;
    store.write_row(
        partition,
        slot_row,
        s.date_col,
        &[head_date.clone(), head_name.clone(), new_cost],
    )?;
    store.write_row(partition, slot_row, s.category_col(), &[category, row_type])?;
    store.write_row(
        partition,
        row,
        s.date_col,
        &[head_date, head_name, head_cost],
    )?;
    // reset the checkbox that triggered the split
    store.write_row(partition, row, s.checkbox_col, &[String::new()])?;

    Ok(RowRange {
        start: row,
        end: slot_row,
    })
}
