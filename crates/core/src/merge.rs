//! Merge engine: combine an incoming frame into a workflow's frame.
//!
//! The merge is computed on copies; the caller swaps the result in only
//! when [`merge_frames`] returns `Ok`, so a rejected merge leaves the
//! destination untouched.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::frame::{FrameColumn, TypedFrame};
use crate::types::TimeZone;
use crate::value::{Cell, DataType, KeyOf};

/// Rows processed between cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeHow {
    Inner,
    Outer,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Source values replace destination values for matching keys. Nulls
    /// in the source never overwrite.
    #[default]
    Override,
    /// Source column gets the first free `_N` suffix.
    RenameAuto,
    /// Source column gets the caller's suffix from `manual_suffixes`.
    RenameManual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeSpec {
    pub how: MergeHow,
    pub left_on: String,
    pub right_on: String,
    /// One flag per source column; empty selects every column.
    #[serde(default)]
    pub column_select: Vec<bool>,
    #[serde(default)]
    pub rename_map: BTreeMap<String, String>,
    #[serde(default)]
    pub collision_policy: CollisionPolicy,
    #[serde(default)]
    pub manual_suffixes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MergeError {
    #[error("'{0}' is not a key column of the workflow")]
    LeftKeyNotKey(String),

    #[error("Column '{0}' is not in the uploaded data")]
    RightKeyMissing(String),

    #[error("Column '{0}' of the uploaded data has empty or repeated values")]
    RightKeyNotUnique(String),

    #[error("Column selection has {got} entries for {expected} columns")]
    ColumnSelectLength { expected: usize, got: usize },

    #[error("Column '{0}' to rename is not in the uploaded data")]
    RenameUnknownColumn(String),

    #[error("Column name '{0}' is used more than once")]
    NameCollision(String),

    #[error("Column '{column}' is {destination} in the workflow but {incoming} in the uploaded data")]
    TypeConflict {
        column: String,
        destination: DataType,
        incoming: DataType,
    },

    #[error("No suffix given for column '{0}'")]
    SuffixMissing(String),
}

/// Result of a successful merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub frame: TypedFrame,
    /// Columns new to the workflow, in frame order.
    pub added_columns: Vec<FrameColumn>,
    /// Existing columns whose values the source updated.
    pub updated_columns: Vec<String>,
    /// Key columns that lost uniqueness and are no longer keys.
    pub demoted_keys: Vec<String>,
    /// Integer columns that gained nulls and became doubles.
    pub promoted_columns: Vec<String>,
}

fn check_cancel(cancel: Option<&CancellationToken>) -> Result<(), CoreError> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(CoreError::Cancelled),
        _ => Ok(()),
    }
}

/// Merge `src` into `dst` according to `spec`.
///
/// `dst_keys` names the destination's key columns.
pub fn merge_frames(
    dst: &TypedFrame,
    dst_keys: &[String],
    src: &TypedFrame,
    spec: &MergeSpec,
    tz: &TimeZone,
    cancel: Option<&CancellationToken>,
) -> Result<MergeOutcome, CoreError> {
    check_cancel(cancel)?;

    // -- preconditions -------------------------------------------------------

    if !dst_keys.contains(&spec.left_on) || !dst.has_column(&spec.left_on) {
        return Err(MergeError::LeftKeyNotKey(spec.left_on.clone()).into());
    }
    if !src.has_column(&spec.right_on) {
        return Err(MergeError::RightKeyMissing(spec.right_on.clone()).into());
    }

    // 1. projection and renames
    let mut source = project_selected(src, spec)?;
    let mut right_on = spec.right_on.clone();
    for (old, new) in &spec.rename_map {
        if !source.has_column(old) {
            return Err(MergeError::RenameUnknownColumn(old.clone()).into());
        }
        source
            .rename_column(old, new)
            .map_err(|_| MergeError::NameCollision(new.clone()))?;
        if *old == right_on {
            right_on = new.clone();
        }
    }

    // 2. normalization
    source.normalize_time_zone(tz);
    source.blank_to_null();

    if !source.is_unique_non_null(&right_on) {
        return Err(MergeError::RightKeyNotUnique(right_on).into());
    }
    let left_type = dst.data_type(&spec.left_on).unwrap_or(DataType::String);
    let right_type = source.data_type(&right_on).unwrap_or(DataType::String);
    if left_type != right_type && !(left_type.is_numeric() && right_type.is_numeric()) {
        return Err(MergeError::TypeConflict {
            column: spec.left_on.clone(),
            destination: left_type,
            incoming: right_type,
        }
        .into());
    }

    // 3. collisions
    let mut overlap: Vec<String> = Vec::new();
    let mut taken: HashSet<String> = dst.column_names().into_iter().collect();
    taken.extend(source.column_names());
    for column in source.columns().to_vec() {
        if column.name == right_on || !dst.has_column(&column.name) {
            continue;
        }
        match spec.collision_policy {
            CollisionPolicy::Override => {
                let destination = dst.data_type(&column.name).unwrap_or(column.data_type);
                let widening = destination == DataType::Double && column.data_type == DataType::Integer;
                if destination != column.data_type && !widening {
                    return Err(MergeError::TypeConflict {
                        column: column.name.clone(),
                        destination,
                        incoming: column.data_type,
                    }
                    .into());
                }
                overlap.push(column.name.clone());
            }
            CollisionPolicy::RenameAuto => {
                let fresh = (1..)
                    .map(|n| format!("{}_{n}", column.name))
                    .find(|candidate| !taken.contains(candidate))
                    .unwrap_or_else(|| column.name.clone());
                source.rename_column(&column.name, &fresh)?;
                taken.insert(fresh);
            }
            CollisionPolicy::RenameManual => {
                let suffix = spec
                    .manual_suffixes
                    .get(&column.name)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| MergeError::SuffixMissing(column.name.clone()))?;
                let fresh = format!("{}{suffix}", column.name);
                if taken.contains(&fresh) {
                    return Err(MergeError::NameCollision(fresh).into());
                }
                source.rename_column(&column.name, &fresh)?;
                taken.insert(fresh);
            }
        }
    }

    // 4. join
    let new_columns: Vec<FrameColumn> = source
        .columns()
        .iter()
        .filter(|c| c.name != right_on && !overlap.contains(&c.name))
        .cloned()
        .collect();

    let left_col = dst.column_index(&spec.left_on).unwrap_or(0);
    let right_col = source.column_index(&right_on).unwrap_or(0);
    let mut src_by_key: HashMap<KeyOf, usize> = HashMap::with_capacity(source.nrows());
    for (i, row) in source.raw_rows().iter().enumerate() {
        if let Some(key) = &row[right_col] {
            src_by_key.insert(key.key_of(), i);
        }
    }

    // (destination row, source row) pairs in output order
    let mut pairs: Vec<(Option<usize>, Option<usize>)> = Vec::new();
    let mut matched_src: HashSet<usize> = HashSet::new();
    let keep_all_dst = new_columns.is_empty() || matches!(spec.how, MergeHow::Left | MergeHow::Outer);
    let append_src_only = matches!(spec.how, MergeHow::Outer | MergeHow::Right);
    for (i, row) in dst.raw_rows().iter().enumerate() {
        if i % CANCEL_CHECK_INTERVAL == 0 {
            check_cancel(cancel)?;
        }
        let hit = row[left_col]
            .as_ref()
            .and_then(|k| src_by_key.get(&k.key_of()).copied());
        if let Some(s) = hit {
            matched_src.insert(s);
        }
        if hit.is_some() || keep_all_dst {
            pairs.push((Some(i), hit));
        }
    }
    if append_src_only {
        for s in 0..source.nrows() {
            if !matched_src.contains(&s) {
                pairs.push((None, Some(s)));
            }
        }
    }

    // 5. assemble
    let mut columns = dst.columns().to_vec();
    columns.extend(new_columns.iter().cloned());
    let dst_width = dst.ncols();
    let src_index: Vec<Option<usize>> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            if i == left_col {
                Some(right_col)
            } else if i >= dst_width || overlap.contains(&c.name) {
                source.column_index(&c.name)
            } else {
                None
            }
        })
        .collect();

    let mut updated: HashSet<String> = HashSet::new();
    let mut rows: Vec<Vec<Cell>> = Vec::with_capacity(pairs.len());
    for (n, (d, s)) in pairs.iter().enumerate() {
        if n % CANCEL_CHECK_INTERVAL == 0 {
            check_cancel(cancel)?;
        }
        let mut out = Vec::with_capacity(columns.len());
        for (c, column) in columns.iter().enumerate() {
            let from_dst = d.and_then(|d| dst.raw_rows()[d].get(c).cloned().flatten());
            let from_src = match (s, src_index[c]) {
                (Some(s), Some(sc)) => source.raw_rows()[*s][sc].clone(),
                _ => None,
            };
            let cell = match (from_dst, from_src) {
                (dst_value, None) => dst_value,
                (None, src_value) => src_value,
                (Some(dst_value), Some(src_value)) => {
                    if c != left_col && !dst_value.same_as(&src_value) {
                        updated.insert(column.name.clone());
                    }
                    if c == left_col {
                        Some(dst_value)
                    } else {
                        Some(src_value)
                    }
                }
            };
            let cell = match cell {
                Some(v) => {
                    let incoming = v.data_type();
                    let coerced = v.coerce_to(column.data_type).ok_or_else(|| MergeError::TypeConflict {
                        column: column.name.clone(),
                        destination: column.data_type,
                        incoming,
                    })?;
                    Some(coerced)
                }
                None => None,
            };
            out.push(cell);
        }
        rows.push(out);
    }

    check_cancel(cancel)?;
    let mut frame = TypedFrame::from_rows(columns, rows)?;
    let promoted_columns = frame.promote_nullable_integers();

    // 6. key validation
    let mut demoted_keys = Vec::new();
    let mut remaining = 0;
    for key in dst_keys {
        if frame.is_unique_non_null(key) {
            remaining += 1;
        } else {
            demoted_keys.push(key.clone());
        }
    }
    if remaining == 0 {
        return Err(CoreError::KeyColumnConstraintViolation(
            "The merge leaves no column with unique, non-empty values".to_string(),
        ));
    }
    if frame.is_empty() {
        return Err(CoreError::EmptyMergeResult);
    }

    let added_columns = new_columns
        .iter()
        .filter_map(|c| {
            frame
                .data_type(&c.name)
                .map(|t| FrameColumn::new(c.name.clone(), t))
        })
        .collect();
    let mut updated_columns: Vec<String> = updated.into_iter().collect();
    updated_columns.sort();

    Ok(MergeOutcome {
        frame,
        added_columns,
        updated_columns,
        demoted_keys,
        promoted_columns,
    })
}

fn project_selected(src: &TypedFrame, spec: &MergeSpec) -> Result<TypedFrame, CoreError> {
    if spec.column_select.is_empty() {
        return Ok(src.clone());
    }
    if spec.column_select.len() != src.ncols() {
        return Err(MergeError::ColumnSelectLength {
            expected: src.ncols(),
            got: spec.column_select.len(),
        }
        .into());
    }
    let names: Vec<String> = src
        .columns()
        .iter()
        .zip(&spec.column_select)
        .filter(|&(c, &keep)| keep || c.name == spec.right_on)
        .map(|(c, _)| c.name.clone())
        .collect();
    src.project(&names)
}
