use chrono::{Days, NaiveDate};
use log::info;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::aggregator::{self, ThreadResult};
use crate::classifier::Receipt;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::ledger_store::LedgerStore;
use crate::money;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const GAP_MARKER: &str = " (gap)";

/// A new window copies the gap flag from the partition this many steps back
/// in descending start order: pay and gap periods alternate, so two back
/// shares the new window's parity.
const GAP_LOOKBACK: usize = 2;

const GAP_TAB_COLOR: &str = "#999999";
const MISSING_AMOUNT_COLOR: &str = "#fff2cc";
const ERROR_NOTE_COLOR: &str = "#f4cccc";

/// One time-bounded slice of the ledger, recovered from its name. The
/// window is inclusive on both ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub gap: bool,
    pub position: usize,
}

fn partition_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{4}-\d{2}-\d{2}) - (\d{4}-\d{2}-\d{2})( \(gap\))?$")
            .expect("invalid partition name regex")
    })
}

pub fn partition_window_name(start: NaiveDate, end: NaiveDate, gap: bool) -> String {
    format!(
        "{} - {}{}",
        start.format(DATE_FORMAT),
        end.format(DATE_FORMAT),
        if gap { GAP_MARKER } else { "" }
    )
}

/// All dated partitions in display order. Names that do not carry a date
/// window (the template, scratch tabs) are skipped.
pub fn scan_partitions(store: &dyn LedgerStore) -> Result<Vec<Partition>> {
    let mut out = Vec::new();
    for (position, name) in store.partition_names()?.iter().enumerate() {
        let Some(caps) = partition_name_re().captures(name) else {
            continue;
        };
        let parse = |idx: usize| {
            NaiveDate::parse_from_str(caps.get(idx).expect("capture exists").as_str(), DATE_FORMAT)
        };
        let (Ok(start), Ok(end)) = (parse(1), parse(2)) else {
            continue;
        };
        out.push(Partition {
            name: name.clone(),
            start,
            end,
            gap: caps.get(3).is_some(),
            position,
        });
    }
    Ok(out)
}

/// Window containment is `start <= date <= end`; a receipt dated exactly on
/// the end date still belongs to the window.
pub fn find_partition_for(date: NaiveDate, partitions: &[Partition]) -> Result<&Partition> {
    partitions
        .iter()
        .find(|p| p.start <= date && date <= p.end)
        .ok_or(Error::PartitionNotFound(date))
}

/// Creates one new partition when the newest window has fully elapsed.
/// Returns `false` when the newest window still covers `today`; calling
/// repeatedly until `false` catches the ledger up to the present.
pub fn create_next_partition_if_needed(
    store: &dyn LedgerStore,
    config: &Config,
    today: NaiveDate,
) -> Result<bool> {
    let partitions = scan_partitions(store)?;
    let Some(latest) = partitions.iter().max_by_key(|p| p.start) else {
        return Err(Error::Config(
            "no dated partitions exist; seed one next to the template first".to_string(),
        ));
    };
    if today <= latest.end {
        return Ok(false);
    }

    let start = latest.end + Days::new(1);
    let end = start + Days::new(u64::from(config.settings.period_days) - 1);
    let mut by_start_desc: Vec<&Partition> = partitions.iter().collect();
    by_start_desc.sort_by(|a, b| b.start.cmp(&a.start));
    let gap = by_start_desc
        .get(GAP_LOOKBACK - 1)
        .map(|p| p.gap)
        .unwrap_or(false);

    let name = partition_window_name(start, end, gap);
    store.duplicate_partition(&config.settings.template_partition, &name, latest.position)?;
    if gap {
        store.set_tab_color(&name, GAP_TAB_COLOR)?;
    }
    info!("created partition {name}");
    Ok(true)
}

pub fn ensure_partitions_current(
    store: &dyn LedgerStore,
    config: &Config,
    today: NaiveDate,
) -> Result<usize> {
    let mut created = 0;
    while create_next_partition_if_needed(store, config, today)? {
        created += 1;
    }
    Ok(created)
}

/// Places every receipt produced by the given thread results into its
/// partition. All receipts are mapped to partitions before the first write,
/// so an unmapped receipt aborts the pass with the ledger untouched.
/// Returns per-partition placement counts.
pub fn place_receipts(
    store: &dyn LedgerStore,
    config: &Config,
    results: &[ThreadResult],
) -> Result<BTreeMap<String, usize>> {
    let receipts = aggregator::flatten_for_placement(results);
    let partitions = scan_partitions(store)?;

    let mut by_partition: BTreeMap<String, Vec<Receipt>> = BTreeMap::new();
    for receipt in receipts {
        let partition = find_partition_for(receipt.date, &partitions)?;
        by_partition
            .entry(partition.name.clone())
            .or_default()
            .push(receipt);
    }

    let mut placed = BTreeMap::new();
    for (name, group) in &by_partition {
        write_partition_rows(store, config, name, group)?;
        placed.insert(name.clone(), group.len());
    }
    Ok(placed)
}

/// First free slot is found by scanning backward from the last window row
/// to the first row with any of the three main columns filled; the run of
/// fully-empty rows after it receives the receipts in order.
fn write_partition_rows(
    store: &dyn LedgerStore,
    config: &Config,
    partition: &str,
    receipts: &[Receipt],
) -> Result<()> {
    let s = &config.settings;
    let block = store.read_rows(partition, s.window_start_row, s.window_rows, s.date_col, 3)?;

    let mut first_free = s.window_start_row;
    for (offset, row) in block.iter().enumerate().rev() {
        if row.iter().any(|v| !v.trim().is_empty()) {
            first_free = s.window_start_row + offset + 1;
            break;
        }
    }
    let free_rows = (s.window_start_row + s.window_rows).saturating_sub(first_free);
    if free_rows < receipts.len() {
        return Err(Error::WindowFull {
            partition: partition.to_string(),
            needed: receipts.len() - free_rows,
        });
    }

    for (i, receipt) in receipts.iter().enumerate() {
        let row = first_free + i;
        let cost = receipt
            .amount_cents
            .map(money::format_cents)
            .unwrap_or_default();
        store.write_row(
            partition,
            row,
            s.date_col,
            &[
                receipt.date.format(DATE_FORMAT).to_string(),
                receipt.counterparty.clone().unwrap_or_default(),
                cost,
            ],
        )?;
        let category = receipt.category.clone().unwrap_or_default();
        let label = receipt.provider_label.clone().unwrap_or_default();
        if !category.is_empty() || !label.is_empty() {
            store.write_row(partition, row, s.category_col(), &[category, label])?;
        }
        if receipt.amount_cents.is_none() {
            store.set_background(partition, row, s.cost_col(), MISSING_AMOUNT_COLOR)?;
        }
        let annotation = receipt.annotation();
        if !annotation.is_empty() {
            store.set_note(partition, row, s.name_col(), &annotation)?;
            if !receipt.error.is_empty() {
                store.set_background(partition, row, s.name_col(), ERROR_NOTE_COLOR)?;
            }
        }
    }
    Ok(())
}
