//! On-disk tables passed between pipeline stages.
//!
//! Every integer is written as an exact decimal string and every address and
//! hash as `0x`-prefixed hex, so a table read back yields the same values.

use crate::decoder::TransferRecord;
use crate::diff::BalanceDiff;
use crate::error::ArtifactError;
use crate::sampler::BalanceSample;
use csv::{ReaderBuilder, StringRecord, Trim, Writer};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::str::FromStr;

pub const TRANSFERS_FILE: &str = "transfers.csv";
pub const BALANCES_FILE: &str = "balances.csv";
pub const BALANCE_CHANGES_FILE: &str = "balance_changes.csv";
pub const BURN_COMMANDS_FILE: &str = "burn_commands.txt";

const TRANSFER_HEADER: [&str; 6] = [
    "block_number",
    "log_index",
    "transaction_hash",
    "from_address",
    "to_address",
    "value",
];
const BALANCE_HEADER: [&str; 3] = ["address", "before", "after"];
const BALANCE_CHANGE_HEADER: [&str; 5] = ["address", "before", "after", "min", "diff"];

pub fn write_transfers<W: Write>(writer: W, transfers: &[TransferRecord]) -> Result<(), ArtifactError> {
    let mut wtr = Writer::from_writer(writer);
    wtr.write_record(TRANSFER_HEADER)?;
    for transfer in transfers {
        wtr.write_record([
            &transfer.block_number.to_string(),
            &transfer.log_index.to_string(),
            &format!("{:?}", transfer.transaction_hash),
            &transfer.from.to_checksum(None),
            &transfer.to.to_checksum(None),
            &transfer.value.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Reads a transfer table. Only `transaction_hash`, `from_address` and
/// `to_address` are required; the other columns default to zero when absent.
pub fn read_transfers<R: Read>(reader: R) -> Result<Vec<TransferRecord>, ArtifactError> {
    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    let columns = Columns::new(rdr.headers()?);
    let hash = columns.require("transaction_hash")?;
    let from = columns.require("from_address")?;
    let to = columns.require("to_address")?;
    let block = columns.find("block_number");
    let index = columns.find("log_index");
    let value = columns.find("value");

    let mut transfers = Vec::new();
    for record in rdr.records() {
        let record = record?;
        if is_blank(&record) {
            continue;
        }
        transfers.push(TransferRecord {
            block_number: parse_optional(&record, block, "block_number")?.unwrap_or_default(),
            log_index: parse_optional(&record, index, "log_index")?.unwrap_or_default(),
            transaction_hash: parse(&record, hash, "transaction_hash")?,
            from: parse(&record, from, "from_address")?,
            to: parse(&record, to, "to_address")?,
            value: parse_optional(&record, value, "value")?.unwrap_or_default(),
        });
    }
    Ok(transfers)
}

pub fn write_balances<W: Write>(writer: W, samples: &[BalanceSample]) -> Result<(), ArtifactError> {
    let mut wtr = Writer::from_writer(writer);
    wtr.write_record(BALANCE_HEADER)?;
    for sample in samples {
        wtr.write_record([
            &sample.address.to_checksum(None),
            &sample.before.to_string(),
            &sample.after.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn read_balances<R: Read>(reader: R) -> Result<Vec<BalanceSample>, ArtifactError> {
    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    let columns = Columns::new(rdr.headers()?);
    let address = columns.require("address")?;
    let before = columns.require("before")?;
    let after = columns.require("after")?;

    let mut samples = Vec::new();
    for record in rdr.records() {
        let record = record?;
        if is_blank(&record) {
            continue;
        }
        samples.push(BalanceSample {
            address: parse(&record, address, "address")?,
            before: parse(&record, before, "before")?,
            after: parse(&record, after, "after")?,
        });
    }
    Ok(samples)
}

pub fn write_balance_changes<W: Write>(writer: W, diffs: &[BalanceDiff]) -> Result<(), ArtifactError> {
    let mut wtr = Writer::from_writer(writer);
    wtr.write_record(BALANCE_CHANGE_HEADER)?;
    for diff in diffs {
        wtr.write_record([
            &diff.address.to_checksum(None),
            &diff.before.to_string(),
            &diff.after.to_string(),
            &diff.min.to_string(),
            &diff.diff.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn read_balance_changes<R: Read>(reader: R) -> Result<Vec<BalanceDiff>, ArtifactError> {
    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    let columns = Columns::new(rdr.headers()?);
    let idx: Vec<usize> = BALANCE_CHANGE_HEADER
        .iter()
        .map(|&name| columns.require(name))
        .collect::<Result<_, _>>()?;

    let mut diffs = Vec::new();
    for record in rdr.records() {
        let record = record?;
        if is_blank(&record) {
            continue;
        }
        diffs.push(BalanceDiff {
            address: parse(&record, idx[0], "address")?,
            before: parse(&record, idx[1], "before")?,
            after: parse(&record, idx[2], "after")?,
            min: parse(&record, idx[3], "min")?,
            diff: parse(&record, idx[4], "diff")?,
        });
    }
    Ok(diffs)
}

/// Writes `path` through a `.tmp` sibling that only replaces the target once
/// `write` has succeeded, so an interrupted stage never leaves a half table behind.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<(), ArtifactError>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<(), ArtifactError>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    let result = File::create(tmp_path)
        .map_err(ArtifactError::from)
        .and_then(|file| {
            let mut writer = BufWriter::new(file);
            write(&mut writer)?;
            writer.flush()?;
            Ok(())
        });

    match result {
        Ok(()) => {
            fs::rename(tmp_path, path)?;
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(tmp_path);
            Err(e)
        }
    }
}

struct Columns<'a> {
    header: &'a StringRecord,
}

impl<'a> Columns<'a> {
    fn new(header: &'a StringRecord) -> Self {
        Self { header }
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h.eq_ignore_ascii_case(name))
    }

    fn require(&self, name: &'static str) -> Result<usize, ArtifactError> {
        self.find(name).ok_or(ArtifactError::Parse {
            line: 1,
            field: name,
            value: "<missing column>".to_string(),
        })
    }
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(str::is_empty)
}

fn parse<T: FromStr>(record: &StringRecord, index: usize, field: &'static str) -> Result<T, ArtifactError> {
    let value = record.get(index).unwrap_or_default();
    value.parse().map_err(|_| ArtifactError::Parse {
        line: record.position().map(|p| p.line()).unwrap_or_default(),
        field,
        value: value.to_string(),
    })
}

fn parse_optional<T: FromStr>(
    record: &StringRecord,
    index: Option<usize>,
    field: &'static str,
) -> Result<Option<T>, ArtifactError> {
    match index {
        Some(index) if record.get(index).is_some_and(|v| !v.is_empty()) => {
            parse(record, index, field).map(Some)
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256, U256};

    #[test]
    fn test_transfer_table_keeps_large_values_exact() {
        let value = U256::from_str("123456789012345678901234567890123").unwrap();
        let transfers = vec![TransferRecord {
            block_number: 138_850_123,
            log_index: 4,
            transaction_hash: B256::repeat_byte(0x0f),
            from: Address::repeat_byte(0x01),
            to: Address::repeat_byte(0x02),
            value,
        }];

        let mut buf = Vec::new();
        write_transfers(&mut buf, &transfers).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();

        assert!(text.starts_with("block_number,log_index,transaction_hash,from_address,to_address,value\n"));
        assert!(text.contains(",123456789012345678901234567890123\n"));
        assert_eq!(read_transfers(buf.as_slice()).unwrap(), transfers);
    }

    #[test]
    fn test_reads_three_column_transfer_table() {
        let csv = "transaction_hash,from_address,to_address\n\
                   0x0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f,0x0101010101010101010101010101010101010101,0x0202020202020202020202020202020202020202\n\
                   \n";

        let transfers = read_transfers(csv.as_bytes()).unwrap();

        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].from, Address::repeat_byte(0x01));
        assert_eq!(transfers[0].to, Address::repeat_byte(0x02));
        assert_eq!(transfers[0].value, U256::ZERO);
    }

    #[test]
    fn test_bad_balance_value_names_line_and_field() {
        let csv = "address,before,after\n0x0101010101010101010101010101010101010101,12,1.5\n";

        let err = read_balances(csv.as_bytes()).unwrap_err();

        match err {
            ArtifactError::Parse { line, field, value } => {
                assert_eq!((line, field, value.as_str()), (2, "after", "1.5"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_balance_change_table_layout() {
        let diffs = vec![BalanceDiff {
            address: Address::repeat_byte(0x0a),
            before: U256::from(40),
            after: U256::from(100),
            min: U256::from(40),
            diff: U256::from(60),
        }];

        let mut buf = Vec::new();
        write_balance_changes(&mut buf, &diffs).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();

        assert_eq!(
            text,
            format!(
                "address,before,after,min,diff\n{},40,100,40,60\n",
                Address::repeat_byte(0x0a).to_checksum(None)
            )
        );
        assert_eq!(read_balance_changes(buf.as_slice()).unwrap(), diffs);
    }

    #[test]
    fn test_addresses_are_written_checksummed() {
        let address = Address::from_str("0xd8da6bf26964af9d7eed9e03e53415d37aa96045").unwrap();
        let samples = vec![BalanceSample {
            address,
            before: U256::from(1),
            after: U256::from(2),
        }];

        let mut buf = Vec::new();
        write_balances(&mut buf, &samples).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();

        assert_eq!(text, "address,before,after\n0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045,1,2\n");
        assert_eq!(read_balances(buf.as_slice()).unwrap(), samples);
    }

    #[test]
    fn test_write_atomic_leaves_no_file_on_failure() {
        let dir = std::env::temp_dir().join(format!("remediation-atomic-{}", std::process::id()));
        let path = dir.join(BALANCES_FILE);

        let result = write_atomic(&path, |_| {
            Err(ArtifactError::Parse {
                line: 0,
                field: "address",
                value: String::new(),
            })
        });
        assert!(result.is_err());
        assert!(!path.exists());
        assert!(!dir.join("balances.csv.tmp").exists());

        write_atomic(&path, |w| write_balances(w, &[])).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "address,before,after\n");
        fs::remove_dir_all(&dir).unwrap();
    }
}
