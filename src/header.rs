use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::error::{EepError, Result};
use crate::riff::ContainerNode;
use crate::types::{ChannelRow, HeaderInfo};
use crate::utils::{day_to_posix, decode_text, parse_f64, parse_i64};

/// Tag → text span map of one header chunk.
///
/// A span runs from the closing `]` of its tag to the next `[` (or the end
/// of the text). When a tag occurs more than once the first span wins.
#[derive(Debug, Default)]
pub struct TagMap<'t> {
    spans: BTreeMap<&'t str, &'t str>,
}

impl<'t> TagMap<'t> {
    /// 单次扫描整个文本块
    pub fn parse(text: &'t str) -> Self {
        let mut spans = BTreeMap::new();
        let mut rest = text;

        while let Some(open) = rest.find('[') {
            let after = &rest[open + 1..];
            let Some(close) = after.find(']') else {
                break;
            };

            let tag = after[..close].trim();
            let body = &after[close + 1..];
            let end = body.find('[').unwrap_or(body.len());

            spans.entry(tag).or_insert(&body[..end]);
            rest = &body[end..];
        }

        TagMap { spans }
    }

    /// Raw span of `tag`, untrimmed
    pub fn span(&self, tag: &str) -> Option<&'t str> {
        self.spans.get(tag).copied()
    }

    /// Trimmed span of `tag`
    pub fn text(&self, tag: &str) -> Option<String> {
        self.span(tag).map(|s| s.trim().to_string())
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

/// Reads the `eeph` and `info` chunks of a container tree.
///
/// `eeph` must exist and carry the channel table; a missing `info` chunk
/// only leaves the acquisition metadata unset.
pub fn read_header(tree: &ContainerNode<'_>) -> Result<HeaderInfo> {
    let eeph = decode_text(tree.get_subtree(&["eeph"])?.data);

    let info = match tree.get_subtree(&["info"]) {
        Ok(node) => Some(decode_text(node.data)),
        Err(EepError::NotFound(_)) => {
            warn!("container has no 'info' chunk, acquisition metadata left unset");
            None
        }
        Err(e) => return Err(e),
    };

    parse_header(&eeph, info.as_deref())
}

/// Parses the text of the `eeph` chunk and, if present, the `info` chunk
pub fn parse_header(eeph: &str, info: Option<&str>) -> Result<HeaderInfo> {
    let mut header = HeaderInfo::default();

    let tags = TagMap::parse(eeph);
    header.file_version = tags.text("File Version");
    if let Some(s) = tags.span("Sampling Rate") {
        header.sample_rate = Some(parse_f64(s, "Sampling Rate")?);
    }
    if let Some(s) = tags.span("Samples") {
        header.sample_count = Some(parse_i64(s, "Samples")?);
    }
    if let Some(s) = tags.span("Channels") {
        let count = parse_i64(s, "Channels")?;
        let count = usize::try_from(count)
            .map_err(|_| EepError::InvalidFormat(format!("Channels: negative count {}", count)))?;
        header.channel_count = Some(count);
    }

    let block = tags.span("Basic Channel Data").ok_or(EepError::MissingChannelTable)?;
    header.channels = parse_channel_table(block)?;

    if let Some(count) = header.channel_count {
        if count != header.channels.len() {
            warn!(declared = count, found = header.channels.len(), "channel count differs from channel table");
        }
    }

    if let Some(info) = info {
        apply_info(&TagMap::parse(info), &mut header)?;
    }

    debug!(
        channels = header.channels.len(),
        sample_rate = ?header.sample_rate,
        samples = ?header.sample_count,
        "parsed header"
    );
    Ok(header)
}

/// 解析 `info` 块中的采集信息
fn apply_info(tags: &TagMap<'_>, header: &mut HeaderInfo) -> Result<()> {
    if let (Some(date), Some(fraction)) = (tags.span("StartDate"), tags.span("StartFraction")) {
        let date = parse_f64(date, "StartDate")?;
        let fraction = parse_f64(fraction, "StartFraction")?;
        header.acquisition_time = Some(day_to_posix(date, fraction));
    }

    // info中的版本号覆盖eeph中的
    if let Some(version) = tags.text("File Version") {
        header.file_version = Some(version);
    }
    if let Some(v) = tags.text("MachineMake") {
        header.software_id = Some(v);
    }
    if let Some(v) = tags.text("MachineModel") {
        header.hardware_id = Some(v);
    }
    if let Some(v) = tags.text("SubjectName") {
        header.subject_name = Some(v);
    }
    if let Some(v) = tags.text("SubjectDateOfBirth") {
        header.subject_birth = Some(v);
    }

    Ok(())
}

/// Parses the body of the `[Basic Channel Data]` block.
///
/// The block starts with a `;label calibration factor ...` comment line;
/// every following non-comment line is `label calib_a calib_b unit [reference]`.
pub fn parse_channel_table(block: &str) -> Result<Vec<ChannelRow>> {
    let mut lines = block.lines().map(str::trim);

    // 定位列说明行
    let found = lines
        .by_ref()
        .any(|line| line.starts_with(';') && line.contains("label") && line.contains("calibration"));
    if !found {
        return Err(EepError::InvalidFormat(
            "channel table lacks its ';label calibration factor' header".to_string(),
        ));
    }

    let mut channels = Vec::new();
    for line in lines {
        if line.is_empty() || line.starts_with(';') {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(EepError::InvalidFormat(format!("channel row '{}' has too few fields", line)));
        }

        let calib_a = parse_f64(fields[1], "calibration factor")?;
        let calib_b = parse_f64(fields[2], "calibration factor")?;

        channels.push(ChannelRow {
            label: fields[0].to_string(),
            calibration: calib_a * calib_b,
            unit: fields[3].to_string(),
            reference: fields.get(4).unwrap_or(&"").to_string(),
        });
    }

    if channels.is_empty() {
        return Err(EepError::MissingChannelTable);
    }

    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EEPH: &str = "[File Version]\n4.0\n\
        [Sampling Rate]\n512.0000000000\n\
        [Samples]\n 2048\n\
        [Channels]\n3\n\
        [Basic Channel Data]\n\
        ;label    calibration factor\n\
        Fp1   1.000e+00  0.5 uV  ref\n\
        Cz    2.0        0.5 uV  A1\n\
        EOG   4          1   mV\n";

    const INFO: &str = "[StartDate]\n36526\n[StartFraction]\n1.25\n\
        [MachineMake]\neego\n[MachineModel]\nEE-225\n\
        [SubjectName]\n Jane Doe \n[SubjectDateOfBirth]\n1980-01-01\n\
        [File Version]\n4.1\n";

    #[test]
    fn test_tag_map_spans() {
        let tags = TagMap::parse("junk [A]\n1\n[B] two words [Empty][A]later");
        assert_eq!(tags.len(), 3);
        assert_eq!(tags.text("A").as_deref(), Some("1"));
        assert_eq!(tags.text("B").as_deref(), Some("two words"));
        assert_eq!(tags.span("Empty"), Some(""));
        assert!(tags.span("C").is_none());
    }

    #[test]
    fn test_tag_map_unclosed_tag() {
        let tags = TagMap::parse("[A]1[B");
        assert_eq!(tags.text("A").as_deref(), Some("1"));
        assert!(tags.span("B").is_none());
    }

    #[test]
    fn test_parse_eeph() {
        let header = parse_header(EEPH, None).unwrap();
        assert_eq!(header.file_version.as_deref(), Some("4.0"));
        assert_eq!(header.sample_rate, Some(512.0));
        assert_eq!(header.sample_count, Some(2048));
        assert_eq!(header.channel_count, Some(3));
        assert!(header.acquisition_time.is_none());
        assert_eq!(header.channel_labels(), ["Fp1", "Cz", "EOG"]);
    }

    #[test]
    fn test_calibration_product() {
        let header = parse_header(EEPH, None).unwrap();
        let cz = &header.channels[1];
        assert_eq!(cz.label, "Cz");
        assert_eq!(cz.calibration, 1.0);
        assert_eq!(cz.unit, "uV");
        assert_eq!(cz.reference, "A1");

        // 缺少参考电极的行
        assert_eq!(header.channels[2].calibration, 4.0);
        assert_eq!(header.channels[2].reference, "");
    }

    #[test]
    fn test_parse_info() {
        let header = parse_header(EEPH, Some(INFO)).unwrap();
        assert_eq!(header.acquisition_time, Some(946_684_800.0 + 1.25));
        assert_eq!(header.file_version.as_deref(), Some("4.1"));
        assert_eq!(header.software_id.as_deref(), Some("eego"));
        assert_eq!(header.hardware_id.as_deref(), Some("EE-225"));
        assert_eq!(header.subject_name.as_deref(), Some("Jane Doe"));
        assert_eq!(header.subject_birth.as_deref(), Some("1980-01-01"));
    }

    #[test]
    fn test_missing_optional_tags() {
        let eeph = "[Basic Channel Data]\n;label calibration factor\nCz 1 1 uV A1\n";
        let header = parse_header(eeph, Some("[SubjectName]\nX\n")).unwrap();
        assert!(header.sample_rate.is_none());
        assert!(header.sample_count.is_none());
        assert!(header.acquisition_time.is_none());
        assert_eq!(header.subject_name.as_deref(), Some("X"));
        assert_eq!(header.channels.len(), 1);
    }

    #[test]
    fn test_missing_channel_table() {
        let result = parse_header("[Samples]\n10\n", None);
        assert!(matches!(result, Err(EepError::MissingChannelTable)));
    }

    #[test]
    fn test_malformed_channel_table() {
        assert!(matches!(
            parse_channel_table("\nCz 1 1 uV\n"),
            Err(EepError::InvalidFormat(_))
        ));
        assert!(matches!(
            parse_channel_table(";label calibration factor\nCz x 1 uV A1\n"),
            Err(EepError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_bad_numeric_tag() {
        let eeph = "[Sampling Rate]\nfast\n[Basic Channel Data]\n;label calibration factor\nCz 1 1 uV A1\n";
        assert!(matches!(parse_header(eeph, None), Err(EepError::InvalidFormat(_))));
    }
}
