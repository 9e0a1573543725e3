//! Per-key source records, read as named tabular channels.
//!
//! A [`SourceReader`] turns one locator (as stored in the header tome) into a
//! map of channel name to rows. [`DsSourceReader`] reads ds records laid out as
//! a JSON manifest plus one parquet artifact per channel.

mod ds;

use std::collections::HashMap;

use arrow::array::RecordBatch;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub use ds::{DsChannel, DsColumn, DsManifest, DsSourceReader, EmptyChannelPolicy};

use crate::error::TomeResult;

/// Channel name to rows for one source record.
pub type Channels = HashMap<String, RecordBatch>;

/// Which columns of a channel to fetch; `columns: None` selects all of them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInstruction {
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
}

impl ChannelInstruction {
    /// Every column of `channel`.
    pub fn all(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            columns: None,
        }
    }

    /// Only `columns` of `channel`, in the given order.
    pub fn columns<I, S>(channel: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channel: channel.into(),
            columns: Some(columns.into_iter().map(Into::into).collect()),
        }
    }
}

/// Merge instructions that name the same channel.
///
/// Channels keep the order of their first appearance. If any instruction for a
/// channel asks for all columns the merged instruction does too; otherwise the
/// column lists are unioned in first-seen order.
pub fn normalize_instructions(instructions: &[ChannelInstruction]) -> Vec<ChannelInstruction> {
    let mut merged: Vec<ChannelInstruction> = Vec::new();
    for instruction in instructions {
        let position = merged
            .iter()
            .position(|merged| merged.channel == instruction.channel);
        let Some(index) = position else {
            merged.push(ChannelInstruction {
                channel: instruction.channel.clone(),
                columns: instruction.columns.as_deref().map(dedup),
            });
            continue;
        };
        let existing = &mut merged[index];
        match (&mut existing.columns, &instruction.columns) {
            (Some(columns), Some(more)) => {
                for column in more {
                    if !columns.contains(column) {
                        columns.push(column.clone());
                    }
                }
            }
            (columns, None) => *columns = None,
            (None, Some(_)) => {}
        }
    }
    merged
}

fn dedup(columns: &[String]) -> Vec<String> {
    let mut unique = Vec::with_capacity(columns.len());
    for column in columns {
        if !unique.contains(column) {
            unique.push(column.clone());
        }
    }
    unique
}

/// Access to the source records a tome is built from.
pub trait SourceReader: Send + Sync {
    /// Read the channels of the record at `locator`.
    ///
    /// `None` instructions read every channel with every column.
    fn read_channels<'a>(
        &'a self,
        locator: &'a str,
        instructions: Option<&'a [ChannelInstruction]>,
    ) -> BoxFuture<'a, TomeResult<Channels>>;

    /// Stable identifier of the record at `locator`, used as its tome key.
    fn record_id<'a>(&'a self, locator: &'a str) -> BoxFuture<'a, TomeResult<String>>;

    /// Locators of every record `depth` levels below `root`, sorted.
    fn discover<'a>(&'a self, root: &'a str, depth: usize) -> BoxFuture<'a, TomeResult<Vec<String>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_merge_per_channel() {
        let normalized = normalize_instructions(&[
            ChannelInstruction::columns("ch1", ["a", "b"]),
            ChannelInstruction::all("ch2"),
            ChannelInstruction::columns("ch1", ["b", "c"]),
        ]);
        assert_eq!(
            normalized,
            vec![
                ChannelInstruction::columns("ch1", ["a", "b", "c"]),
                ChannelInstruction::all("ch2"),
            ]
        );
    }

    #[test]
    fn any_all_columns_instruction_wins() {
        let normalized = normalize_instructions(&[
            ChannelInstruction::columns("ch1", ["a"]),
            ChannelInstruction::all("ch1"),
            ChannelInstruction::columns("ch1", ["b"]),
        ]);
        assert_eq!(normalized, vec![ChannelInstruction::all("ch1")]);
    }

    #[test]
    fn duplicate_columns_in_one_instruction_collapse() {
        let normalized =
            normalize_instructions(&[ChannelInstruction::columns("ch1", ["a", "a", "b"])]);
        assert_eq!(
            normalized,
            vec![ChannelInstruction::columns("ch1", ["a", "b"])]
        );
    }

    #[test]
    fn instructions_use_plain_json() {
        let parsed: Vec<ChannelInstruction> =
            serde_json::from_str(r#"[{"channel":"ch1"},{"channel":"ch2","columns":["x"]}]"#)
                .expect("parse");
        assert_eq!(
            parsed,
            vec![
                ChannelInstruction::all("ch1"),
                ChannelInstruction::columns("ch2", ["x"]),
            ]
        );
    }
}
