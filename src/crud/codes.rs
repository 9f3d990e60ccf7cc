//! Sequential entity code allocation.
//!
//! Codes are allocated by reading the current maximum inside the surrounding
//! write transaction and incrementing its numeric tail. Two concurrent
//! transactions allocating in the same scope can read the same maximum and
//! commit duplicate codes; callers needing uniqueness under concurrency must
//! serialize externally or carry a unique index on the code column.

use deadpool_postgres::Transaction;

use crate::crud::SampleInput;
use crate::error::{CrudError, CrudResult};

/// Default prefix for subject codes when the type has no history yet.
pub(crate) const SUBJECT_CODE_PREFIX: &str = "CPN-";

/// Fallback prefix for biobank codes of types without one.
pub(crate) const START_SAMPLE_CODE: &str = "0";

/// Next subject code for a type: the latest code's numeric tail plus one,
/// keeping its prefix. An explicitly requested code wins.
pub(crate) async fn next_subject_code(
    tx: &Transaction<'_>,
    data_type: i64,
    requested: Option<&str>,
) -> CrudResult<String> {
    if let Some(code) = requested {
        return Ok(code.to_string());
    }
    let row = tx
        .query_opt(
            "SELECT code FROM subject WHERE type = $1 ORDER BY id DESC LIMIT 1",
            &[&data_type],
        )
        .await?;
    let Some(row) = row else {
        return Ok(format!("{SUBJECT_CODE_PREFIX}1"));
    };
    let latest: Option<String> = row.get(0);
    match latest {
        Some(code) => Ok(bump_numeric_tail(&code, SUBJECT_CODE_PREFIX)),
        None => Ok(format!("{SUBJECT_CODE_PREFIX}1")),
    }
}

/// Next biobank code for a sample. Types flagged `parent_code` derive the
/// code from the first parent sample; otherwise the latest code of the same
/// type and biobank is incremented under the type's prefix.
pub(crate) async fn next_biobank_code(
    tx: &Transaction<'_>,
    sample: &SampleInput,
) -> CrudResult<Option<String>> {
    if let Some(code) = &sample.biobank_code {
        return Ok(Some(code.clone()));
    }
    let row = tx
        .query_opt(
            "SELECT biobank_prefix, parent_code, parent_no_prefix FROM data_type WHERE id = $1",
            &[&sample.data_type],
        )
        .await?;
    let Some(row) = row else {
        return Err(CrudError::CodeAllocation {
            message: format!("unknown data type {}", sample.data_type),
        });
    };
    let prefix: Option<String> = row.get(0);
    let parent_code: Option<bool> = row.get(1);
    let parent_no_prefix: Option<bool> = row.get(2);

    if parent_code.unwrap_or(false) {
        let Some(parent) = sample.parent_sample.first() else {
            return Err(CrudError::CodeAllocation {
                message: format!(
                    "data type {} derives codes from the parent sample, but none was given",
                    sample.data_type
                ),
            });
        };
        let code = if parent_no_prefix.unwrap_or(false) {
            parent.to_string()
        } else {
            format!("{}{parent}", prefix.as_deref().unwrap_or(""))
        };
        return Ok(Some(code));
    }

    let latest = tx
        .query_opt(
            "SELECT biobank_code FROM sample WHERE type = $1 AND biobank = $2 \
             ORDER BY id DESC LIMIT 1",
            &[&sample.data_type, &sample.biobank],
        )
        .await?;
    let latest_code = latest
        .and_then(|row| row.get::<_, Option<String>>(0))
        .unwrap_or_else(|| START_SAMPLE_CODE.to_string());
    Ok(Some(bump_numeric_tail(
        &latest_code,
        prefix.as_deref().unwrap_or(START_SAMPLE_CODE),
    )))
}

/// Increments the trailing digits of a code, keeping its prefix. Codes with
/// no prefix of their own get `default_prefix`; codes with no numeric tail
/// restart the sequence under `default_prefix`.
fn bump_numeric_tail(code: &str, default_prefix: &str) -> String {
    let tail_len = code
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .count();
    let split = code.len() - tail_len;
    let (prefix, digits) = code.split_at(split);
    match digits.parse::<u64>() {
        Ok(n) if prefix.is_empty() => format!("{default_prefix}{}", n + 1),
        Ok(n) => format!("{prefix}{}", n + 1),
        Err(_) => format!("{default_prefix}1"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bumps_the_numeric_tail_keeping_the_prefix() {
        assert_eq!(bump_numeric_tail("CPN-41", "CPN-"), "CPN-42");
        assert_eq!(bump_numeric_tail("BB09", "X"), "BB10");
    }

    #[test]
    fn bare_numbers_get_the_default_prefix() {
        assert_eq!(bump_numeric_tail("7", "SMP"), "SMP8");
        assert_eq!(bump_numeric_tail("0", "0"), "01");
    }

    #[test]
    fn codes_without_digits_restart_the_sequence() {
        assert_eq!(bump_numeric_tail("LEGACY", "CPN-"), "CPN-1");
        assert_eq!(bump_numeric_tail("", "CPN-"), "CPN-1");
    }
}
