//! Raw sample section (`raw3`) and the boundary to the sample codec.
//!
//! The `raw3` list holds three chunks: `ep` (samples per epoch followed by
//! the start offset of every epoch), `chan` (stored channel order) and
//! `data` (the compressed stream). Decompression itself is delegated to a
//! [`SampleCodec`]; this module only slices the stream into epochs, stitches
//! the decoded blocks together, restores the channel order and applies the
//! calibration factors.

use crate::error::{EepError, Result};
use crate::riff::ContainerNode;
use crate::types::HeaderInfo;

/// Decoded block returned by a [`SampleCodec`]
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBlock {
    /// Channel-major samples: `channel_count` runs of `sample_count` values
    pub samples: Vec<i32>,
    /// Codec status; values below 1 mean failure
    pub status: i64,
}

/// Decoder for the compressed sample stream.
///
/// `offset` addresses the start of the block inside `data` exactly as the
/// epoch table stores it, scaled by 8.
pub trait SampleCodec {
    fn decode_block(
        &self,
        data: &[u8],
        sample_count: usize,
        channel_count: usize,
        offset: u64,
    ) -> Result<DecodedBlock>;
}

/// Layout of the `raw3` section
#[derive(Debug, Clone, PartialEq)]
pub struct RawLayout<'a> {
    pub samples_per_epoch: u64,
    pub epoch_starts: Vec<u64>,
    pub channel_order: Vec<usize>,
    pub data: &'a [u8],
}

impl<'a> RawLayout<'a> {
    /// Reads `raw3/ep`, `raw3/chan` and `raw3/data` from a container tree
    pub fn from_tree(tree: &ContainerNode<'a>) -> Result<Self> {
        let ep = tree.get_subtree(&["raw3", "ep"])?.data;
        let chan = tree.get_subtree(&["raw3", "chan"])?.data;
        let data = tree.get_subtree(&["raw3", "data"])?.data;

        if ep.len() < 8 || ep.len() % 8 != 0 {
            return Err(EepError::InvalidFormat(format!("epoch table of {} bytes", ep.len())));
        }
        if chan.len() % 2 != 0 {
            return Err(EepError::InvalidFormat(format!("channel order of {} bytes", chan.len())));
        }

        // ep: 每项为8字节小端整数，第一项是每个epoch的样本数
        let mut values = ep.chunks_exact(8).map(|c| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(c);
            u64::from_le_bytes(buf)
        });
        let samples_per_epoch = values.next().unwrap_or(0);
        let epoch_starts: Vec<u64> = values.collect();

        // chan: 每项为2字节小端整数
        let channel_order = chan
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]) as usize)
            .collect();

        Ok(RawLayout {
            samples_per_epoch,
            epoch_starts,
            channel_order,
            data,
        })
    }

    pub fn epoch_count(&self) -> usize {
        self.epoch_starts.len()
    }
}

/// Calibrated samples, `sample_count` rows of `channel_count` values
#[derive(Debug, Clone, PartialEq)]
pub struct SampleMatrix {
    pub sample_count: usize,
    pub channel_count: usize,
    pub data: Vec<f64>,
}

impl SampleMatrix {
    pub fn get(&self, sample: usize, channel: usize) -> Option<f64> {
        if sample >= self.sample_count || channel >= self.channel_count {
            return None;
        }
        Some(self.data[sample * self.channel_count + channel])
    }

    /// All channels of one sample
    pub fn row(&self, sample: usize) -> Option<&[f64]> {
        let start = sample.checked_mul(self.channel_count)?;
        self.data.get(start..start + self.channel_count)
    }

    /// Copies out one channel
    pub fn channel(&self, channel: usize) -> Result<Vec<f64>> {
        if channel >= self.channel_count {
            return Err(EepError::InvalidChannelIndex(channel));
        }
        Ok(self
            .data
            .iter()
            .skip(channel)
            .step_by(self.channel_count)
            .copied()
            .collect())
    }
}

/// Decodes every epoch of the raw section into a calibrated sample matrix.
///
/// The last epoch holds whatever samples the full epochs leave over. Output
/// column `j` is stored column `channel_order[j]`, scaled by the calibration
/// of header channel `j`.
pub fn read_samples<C: SampleCodec + ?Sized>(
    layout: &RawLayout<'_>,
    codec: &C,
    header: &HeaderInfo,
) -> Result<SampleMatrix> {
    let total = header.sample_count.ok_or(EepError::MissingHeaderField("Samples"))?;
    let total = usize::try_from(total)
        .map_err(|_| EepError::InvalidFormat(format!("negative sample count {}", total)))?;
    let nchan = header.channel_count.unwrap_or(header.channels.len());

    if header.channels.len() != nchan {
        return Err(EepError::InvalidFormat(format!(
            "{} channels declared but {} described",
            nchan,
            header.channels.len()
        )));
    }
    if layout.channel_order.len() != nchan {
        return Err(EepError::InvalidFormat(format!(
            "channel order lists {} channels, header declares {}",
            layout.channel_order.len(),
            nchan
        )));
    }
    if let Some(&bad) = layout.channel_order.iter().find(|&&c| c >= nchan) {
        return Err(EepError::InvalidChannelIndex(bad));
    }

    let nepoch = layout.epoch_count();
    if nepoch == 0 {
        return Err(EepError::InvalidFormat("raw section has no epochs".to_string()));
    }

    let per_epoch = usize::try_from(layout.samples_per_epoch).map_err(|_| {
        EepError::InvalidFormat(format!("{} samples per epoch", layout.samples_per_epoch))
    })?;
    let full = per_epoch
        .checked_mul(nepoch - 1)
        .filter(|&n| n <= total)
        .ok_or_else(|| EepError::InvalidFormat("epoch table covers more samples than the recording".to_string()))?;

    // 最后一个epoch不能超过每个epoch的样本数
    let last = total - full;
    if per_epoch > 0 && last > per_epoch {
        return Err(EepError::InvalidFormat(format!(
            "{} samples declared but {} epochs of {} hold at most {}",
            total,
            nepoch,
            per_epoch,
            full + per_epoch
        )));
    }
    if total.checked_mul(nchan).is_none() {
        return Err(EepError::InvalidFormat(format!(
            "{} samples of {} channels overflow the address space",
            total, nchan
        )));
    }

    // 按采样顺序排列的原始数据（行：样本，列：存储通道），按块增长
    let mut stored = Vec::new();
    for (index, &start) in layout.epoch_starts.iter().enumerate() {
        let count = if index + 1 == nepoch { last } else { per_epoch };

        let offset = start
            .checked_mul(8)
            .ok_or_else(|| EepError::InvalidFormat(format!("epoch {} starts at {}", index, start)))?;
        let block = codec.decode_block(layout.data, count, nchan, offset)?;
        if block.status < 1 {
            return Err(EepError::Codec(format!("epoch {} failed with status {}", index, block.status)));
        }
        if block.samples.len() != count * nchan {
            return Err(EepError::Codec(format!(
                "epoch {} decoded {} values, expected {}",
                index,
                block.samples.len(),
                count * nchan
            )));
        }

        stored.reserve(block.samples.len());
        for s in 0..count {
            for c in 0..nchan {
                stored.push(block.samples[c * count + s]);
            }
        }
    }

    let mut data = Vec::with_capacity(stored.len());
    for row in stored.chunks_exact(nchan.max(1)).take(total) {
        for (j, &source) in layout.channel_order.iter().enumerate() {
            data.push(row[source] as f64 * header.channels[j].calibration);
        }
    }

    Ok(SampleMatrix {
        sample_count: total,
        channel_count: nchan,
        data,
    })
}
