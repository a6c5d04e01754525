use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use serde::Serialize;

use super::model::{Row, Schema};
use crate::error::QueryError;

/// Subjects shown per page of the individual view.
pub const PAGE_LENGTH: usize = 20;

// ---------------------------------------------------------------------------
// Disaggregation
// ---------------------------------------------------------------------------

/// Rows sharing one composite covariate key.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub key: String,
    pub rows: Vec<Row>,
}

/// Partition `rows` by the `_`-joined values of `variables`.
///
/// Groups come back in first-appearance order of their key and rows keep
/// their input order within a group. No variables means a single `"all"`
/// group.
pub fn disaggregate(
    schema: &Schema,
    rows: Vec<Row>,
    variables: &[String],
) -> Result<Vec<Group>, QueryError> {
    let positions = variables
        .iter()
        .map(|v| {
            schema
                .position(v)
                .ok_or_else(|| QueryError::ColumnNotFound(v.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if positions.is_empty() {
        return Ok(vec![Group {
            key: "all".to_string(),
            rows,
        }]);
    }

    let mut groups: Vec<Group> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();
    for row in rows {
        let key = positions
            .iter()
            .map(|&p| row.cell(p).to_string())
            .collect::<Vec<_>>()
            .join("_");
        match slots.get(&key) {
            Some(&slot) => groups[slot].rows.push(row),
            None => {
                slots.insert(key.clone(), groups.len());
                groups.push(Group {
                    key,
                    rows: vec![row],
                });
            }
        }
    }
    Ok(groups)
}

// ---------------------------------------------------------------------------
// Facet layout
// ---------------------------------------------------------------------------

/// Every ordered combination drawing one level from each list; the first
/// list varies slowest.
pub fn cross_product<T: Clone>(level_lists: &[Vec<T>]) -> Vec<Vec<T>> {
    let Some((first, rest)) = level_lists.split_first() else {
        return Vec::new();
    };
    let mut combos: Vec<Vec<T>> = first.iter().map(|l| vec![l.clone()]).collect();
    for list in rest {
        combos = combos
            .iter()
            .flat_map(|prefix| {
                list.iter().map(move |l| {
                    let mut next = prefix.clone();
                    next.push(l.clone());
                    next
                })
            })
            .collect();
    }
    combos
}

// ---------------------------------------------------------------------------
// Subject pagination
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    /// 1-based.
    pub page_index: usize,
    pub subject_ids: Vec<T>,
}

/// Distinct ids split into fixed-size pages.
#[derive(Debug, Clone, PartialEq)]
pub struct Pagination<T> {
    pub pages: Vec<Page<T>>,
    pub num_pages: usize,
}

impl<T> Pagination<T> {
    /// Ids on page `index` (1-based). Out-of-range pages are empty.
    pub fn page(&self, index: usize) -> &[T] {
        index
            .checked_sub(1)
            .and_then(|i| self.pages.get(i))
            .map(|p| p.subject_ids.as_slice())
            .unwrap_or(&[])
    }
}

/// Deduplicate `ids` (keeping first appearances) and split them into pages
/// of `page_length`.
pub fn paginate_ids<T, I>(ids: I, page_length: usize) -> Pagination<T>
where
    T: Clone + Eq + Hash,
    I: IntoIterator<Item = T>,
{
    let page_length = page_length.max(1);
    let mut seen = HashSet::new();
    let distinct: Vec<T> = ids.into_iter().filter(|id| seen.insert(id.clone())).collect();

    let pages: Vec<Page<T>> = distinct
        .chunks(page_length)
        .enumerate()
        .map(|(i, chunk)| Page {
            page_index: i + 1,
            subject_ids: chunk.to_vec(),
        })
        .collect();
    let num_pages = pages.len();
    Pagination { pages, num_pages }
}
