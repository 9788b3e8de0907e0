//! Line-diff synthesis and application, plus the wire encoding for a change
//! list (the content of an update blob, minus its 4-byte dependency header).
//!
//! A change record is `[varint: size][varint: line_num][1 byte op][bytes]`,
//! where `size = varint_len(line_num) + 1 + len(bytes)` so a reader can skip
//! a record it doesn't understand without decoding its content.

use crate::error::{FeedError, Result};
use crate::varint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Insert,
    Delete,
}

impl ChangeOp {
    fn to_byte(self) -> u8 {
        match self {
            ChangeOp::Insert => b'I',
            ChangeOp::Delete => b'D',
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        match b {
            b'I' => Ok(ChangeOp::Insert),
            b'D' => Ok(ChangeOp::Delete),
            other => Err(FeedError::Malformed(format!("unknown change op byte {other:#04x}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// 1-based line number the operation applies to.
    pub line_num: u32,
    pub op: ChangeOp,
    pub content: String,
}

/// Diff two versions of a file, line by line, producing the change list
/// that turns `old` into `new`. Deterministic: identical inputs always
/// produce an identical change list.
pub fn get_changes(old: &str, new: &str) -> Vec<ChangeRecord> {
    let mut old_lines: Vec<&str> = old.split('\n').collect();
    let mut new_lines: Vec<&str> = new.split('\n').collect();
    let mut changes = Vec::new();
    let mut line_num: u32 = 1;

    while !old_lines.is_empty() && !new_lines.is_empty() {
        let old_l = old_lines.remove(0);
        let new_l = new_lines.remove(0);

        if old_l == new_l {
            line_num += 1;
            continue;
        }

        if !new_lines.contains(&old_l) {
            changes.push(ChangeRecord {
                line_num,
                op: ChangeOp::Delete,
                content: old_l.to_string(),
            });
            new_lines.insert(0, new_l);
            continue;
        }

        old_lines.insert(0, old_l);
        changes.push(ChangeRecord {
            line_num,
            op: ChangeOp::Insert,
            content: new_l.to_string(),
        });
        line_num += 1;
    }

    for line in old_lines {
        changes.push(ChangeRecord {
            line_num,
            op: ChangeOp::Delete,
            content: line.to_string(),
        });
    }
    for line in new_lines {
        changes.push(ChangeRecord {
            line_num,
            op: ChangeOp::Insert,
            content: line.to_string(),
        });
        line_num += 1;
    }

    changes
}

/// Replay `changes` against `content`, a line-array view indexed 1-based.
pub fn apply_changes(content: &str, changes: &[ChangeRecord]) -> String {
    let mut lines: Vec<String> = content.split('\n').map(|s| s.to_string()).collect();

    for change in changes {
        let idx = (change.line_num - 1) as usize;
        match change.op {
            ChangeOp::Insert => lines.insert(idx, change.content.clone()),
            ChangeOp::Delete => {
                if idx < lines.len() {
                    lines.remove(idx);
                }
            }
        }
    }

    lines.join("\n")
}

/// Flip every op and reverse the order, turning an apply-list into a
/// revert-list (or vice versa).
pub fn reverse_changes(changes: &[ChangeRecord]) -> Vec<ChangeRecord> {
    let mut out: Vec<ChangeRecord> = changes
        .iter()
        .map(|c| ChangeRecord {
            line_num: c.line_num,
            op: match c.op {
                ChangeOp::Insert => ChangeOp::Delete,
                ChangeOp::Delete => ChangeOp::Insert,
            },
            content: c.content.clone(),
        })
        .collect();
    out.reverse();
    out
}

/// Encode `(dependency_version, changes)` into an update blob's content.
pub fn encode_changes(changes: &[ChangeRecord], dependency: u32) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&dependency.to_be_bytes());

    for change in changes {
        let line_bytes = varint::encode_var_int(change.line_num);
        let mut body = Vec::with_capacity(line_bytes.len() + 1 + change.content.len());
        body.extend_from_slice(&line_bytes);
        body.push(change.op.to_byte());
        body.extend_from_slice(change.content.as_bytes());

        out.extend_from_slice(&varint::encode_var_int(body.len() as u32));
        out.extend_from_slice(&body);
    }

    out
}

/// Decode an update blob's content back into `(changes, dependency_version)`.
pub fn decode_changes(data: &[u8]) -> Result<(Vec<ChangeRecord>, u32)> {
    if data.len() < 4 {
        return Err(FeedError::Malformed("update blob shorter than dependency header".into()));
    }
    let dependency = u32::from_be_bytes(data[..4].try_into().unwrap());

    let mut changes = Vec::new();
    let mut cursor = 4;
    while cursor < data.len() {
        let (_size, size_len) = varint::decode_var_int(&data[cursor..])
            .ok_or_else(|| FeedError::Malformed("truncated change record size".into()))?;
        cursor += size_len;

        let (line_num, line_len) = varint::decode_var_int(&data[cursor..])
            .ok_or_else(|| FeedError::Malformed("truncated change record line number".into()))?;
        cursor += line_len;

        let op = ChangeOp::from_byte(*data.get(cursor).ok_or_else(|| FeedError::Malformed("truncated change record op".into()))?)?;
        cursor += 1;

        let str_len = _size as usize - line_len - 1;
        let content = if str_len == 0 {
            String::new()
        } else {
            let bytes = data
                .get(cursor..cursor + str_len)
                .ok_or_else(|| FeedError::Malformed("truncated change record content".into()))?;
            String::from_utf8(bytes.to_vec()).map_err(|e| FeedError::Malformed(e.to_string()))?
        };
        cursor += str_len;

        changes.push(ChangeRecord { line_num, op, content });
    }

    Ok((changes, dependency))
}
