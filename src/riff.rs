//! Generic reader for RIFF and RF64 container trees.
//!
//! A container file is a tree of labelled, length-prefixed chunks. The three
//! list labels `RIFF`, `RF64` and `LIST` introduce a nested list: they are
//! followed by a four-byte sub-label and then by the child chunks. Every other
//! label carries raw payload bytes, padded to an even length.
//!
//! The tree borrows the payloads from the input buffer, so reading even a
//! large recording copies nothing but the node headers.
//!
//! ```rust
//! use eepread::riff::{self, ContainerNode};
//! use eepread::doctest_utils::{chunk, list, riff_file};
//!
//! let bytes = riff_file("CNT ", &[
//!     chunk("eeph", b"[Samples]\n10\n"),
//!     list("raw3", &[chunk("ep", &[0u8; 8])]),
//! ]);
//!
//! let tree = riff::read_file(&bytes)?;
//! assert_eq!(tree.label, "CNT");
//!
//! let ep = tree.get_subtree(&["raw3", "ep"])?;
//! assert_eq!(ep.data.len(), 8);
//! # Ok::<(), eepread::EepError>(())
//! ```

use std::ops::Deref;

use tracing::{debug, warn};

use crate::error::{EepError, Result};

/// 列表类型的标签，后面跟一个子标签和子节点
const LIST_LABELS: [&[u8; 4]; 3] = [b"RIFF", b"RF64", b"LIST"];

/// 嵌套深度上限，防止损坏文件导致栈溢出
const MAX_NESTING: usize = 64;

/// A node of the container tree
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerNode<'a> {
    /// Trimmed label; for list nodes this is the sub-label
    pub label: String,
    /// Length as declared in the chunk header
    pub length: u64,
    /// Byte offset of the payload (just after the length field)
    pub offset: usize,
    /// Payload bytes, empty for list nodes
    pub data: &'a [u8],
    pub children: Vec<ContainerNode<'a>>,
}

/// Result of a branch lookup, together with any ambiguity met on the way
#[derive(Debug)]
pub struct Subtree<'n, 'a> {
    node: &'n ContainerNode<'a>,
    warnings: Vec<EepError>,
}

impl<'n, 'a> Subtree<'n, 'a> {
    pub fn node(&self) -> &'n ContainerNode<'a> {
        self.node
    }

    /// `EepError::Ambiguous` entries for every level that matched more than once
    pub fn warnings(&self) -> &[EepError] {
        &self.warnings
    }

    pub fn is_ambiguous(&self) -> bool {
        !self.warnings.is_empty()
    }
}

impl<'n, 'a> Deref for Subtree<'n, 'a> {
    type Target = ContainerNode<'a>;

    fn deref(&self) -> &ContainerNode<'a> {
        self.node
    }
}

impl<'a> ContainerNode<'a> {
    pub fn is_list(&self) -> bool {
        self.data.is_empty() && !self.children.is_empty()
    }

    /// Walks `path` one label per level, matching trimmed labels.
    ///
    /// An empty path returns the node itself. A level with no match fails
    /// with `EepError::NotFound`; a level with several matches continues
    /// with the first one and records an `EepError::Ambiguous` warning.
    pub fn get_subtree<'n>(&'n self, path: &[&str]) -> Result<Subtree<'n, 'a>> {
        let mut node = self;
        let mut warnings = Vec::new();

        for label in path {
            let label = label.trim();
            let mut hits = node.children.iter().filter(|c| c.label == label);

            let first = hits
                .next()
                .ok_or_else(|| EepError::NotFound(format!("'{}' under '{}'", label, node.label)))?;

            let extra = hits.count();
            if extra > 0 {
                warn!(label, hits = extra + 1, "several hits for branch, using the first one");
                warnings.push(EepError::Ambiguous {
                    label: label.to_string(),
                    hits: extra + 1,
                });
            }

            node = first;
        }

        Ok(Subtree { node, warnings })
    }
}

/// Parses a whole RIFF or RF64 buffer into its chunk tree
pub fn read_file(bytes: &[u8]) -> Result<ContainerNode<'_>> {
    let magic = bytes
        .get(0..4)
        .ok_or_else(|| EepError::TruncatedFile("missing magic number".to_string()))?;

    // RIFF使用4字节长度字段，RF64使用8字节
    let width = match magic {
        b"RIFF" => 4,
        b"RF64" => 8,
        _ => return Err(EepError::BadMagic(String::from_utf8_lossy(magic).into_owned())),
    };

    let declared = read_length(bytes, 4, width)?;
    let needed = declared.saturating_add(4 + width as u64);
    if needed > bytes.len() as u64 {
        return Err(EepError::TruncatedFile(format!(
            "declared {} bytes but the file holds {}",
            needed,
            bytes.len()
        )));
    }

    let (tree, _) = read_node(bytes, 0, width, 0)?;
    debug!(label = %tree.label, children = tree.children.len(), "read container tree");
    Ok(tree)
}

/// Convenience form of [`ContainerNode::get_subtree`]
pub fn get_subtree<'n, 'a>(node: &'n ContainerNode<'a>, path: &[&str]) -> Result<Subtree<'n, 'a>> {
    node.get_subtree(path)
}

/// 读取一个节点，返回节点和其后的位置
fn read_node(bytes: &[u8], pos: usize, width: usize, depth: usize) -> Result<(ContainerNode<'_>, usize)> {
    if depth > MAX_NESTING {
        return Err(EepError::InvalidFormat("container nesting too deep".to_string()));
    }

    let raw_label = read_label(bytes, pos)?;
    let length = read_length(bytes, pos + 4, width)?;
    let offset = pos + 4 + width;

    if LIST_LABELS.iter().any(|l| *l == raw_label) {
        if length < 4 {
            return Err(EepError::InvalidFormat(format!(
                "list chunk at {} shorter than its sub-label",
                pos
            )));
        }

        let sub_label = read_label(bytes, offset)?;
        let end = checked_end(bytes, offset, length)?;

        let mut children = Vec::new();
        let mut cursor = offset + 4;
        while cursor < end {
            let (child, next) = read_node(bytes, cursor, width, depth + 1)?;
            children.push(child);
            cursor = next;
        }

        let node = ContainerNode {
            label: label_text(sub_label),
            length,
            offset,
            data: &[],
            children,
        };
        return Ok((node, cursor));
    }

    let end = checked_end(bytes, offset, length)?;
    let data = &bytes[offset..end];

    // 奇数长度后有一个填充字节
    let next = end + (length % 2) as usize;

    let node = ContainerNode {
        label: label_text(raw_label),
        length,
        offset,
        data,
        children: Vec::new(),
    };
    Ok((node, next))
}

fn read_label(bytes: &[u8], pos: usize) -> Result<&[u8; 4]> {
    bytes
        .get(pos..pos + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| EepError::TruncatedFile(format!("chunk label at offset {}", pos)))
}

fn read_length(bytes: &[u8], pos: usize, width: usize) -> Result<u64> {
    let field = bytes
        .get(pos..pos + width)
        .ok_or_else(|| EepError::TruncatedFile(format!("chunk length at offset {}", pos)))?;

    let mut buf = [0u8; 8];
    buf[..width].copy_from_slice(field);
    Ok(u64::from_le_bytes(buf))
}

fn checked_end(bytes: &[u8], offset: usize, length: u64) -> Result<usize> {
    let end = (offset as u64).saturating_add(length);
    if end > bytes.len() as u64 {
        return Err(EepError::TruncatedFile(format!(
            "chunk at offset {} declares {} bytes past the end of the file",
            offset,
            end - bytes.len() as u64
        )));
    }
    Ok(end as usize)
}

fn label_text(raw: &[u8; 4]) -> String {
    String::from_utf8_lossy(raw).trim().trim_end_matches('\0').to_string()
}
