//! Shape, pitch and padding descriptors for data and weights buffers.

mod layout;

use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

pub use layout::{
    ceil_div, round_up, DataChannel, DataLayout, Datatype, WeightsChannel, WeightsLayout,
    WeightsType,
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub struct Pad {
    pub before: usize,
    pub after: usize,
}

impl Pad {
    pub fn new(before: usize, after: usize) -> Self {
        Self { before, after }
    }

    pub fn total(&self) -> usize {
        self.before + self.after
    }
}

/// One axis of a tensor: logical extent, element pitch and padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dim {
    pub v: usize,
    pub pitch: usize,
    pub pad: Pad,
}

impl Dim {
    pub fn new(v: usize, pitch: usize, pad: Pad) -> Self {
        Self { v, pitch, pad }
    }

    pub fn logical_dim_padded(&self) -> usize {
        self.v + self.pad.total()
    }
}

impl Default for Dim {
    fn default() -> Self {
        Self {
            v: 1,
            pitch: 1,
            pad: Pad::default(),
        }
    }
}

pub trait TensorLayout: Copy + Eq + Hash + fmt::Debug {
    fn channel_count(self) -> usize;
    fn is_simple(self) -> bool;
    fn name(self) -> &'static str;
    fn physical_extents(self, extents: &[usize]) -> Vec<usize>;

    /// Adjusts pitches for layouts whose blocks interleave two axes.
    fn fixup_dims(self, _dims: &mut [Dim], _rounded: &[usize]) {}
}

pub trait ElementType: Copy + Eq + Hash + fmt::Debug {
    fn size_in_bytes(self) -> usize;
    fn cl_type(self) -> &'static str;
    fn name(self) -> &'static str;
}

impl TensorLayout for DataLayout {
    fn channel_count(self) -> usize {
        DataLayout::channel_count(self)
    }

    fn is_simple(self) -> bool {
        DataLayout::is_simple(self)
    }

    fn name(self) -> &'static str {
        self.as_str()
    }

    fn physical_extents(self, extents: &[usize]) -> Vec<usize> {
        DataLayout::physical_extents(self, extents)
    }
}

impl TensorLayout for WeightsLayout {
    fn channel_count(self) -> usize {
        WeightsLayout::channel_count(self)
    }

    fn is_simple(self) -> bool {
        WeightsLayout::is_simple(self)
    }

    fn name(self) -> &'static str {
        self.as_str()
    }

    fn physical_extents(self, extents: &[usize]) -> Vec<usize> {
        WeightsLayout::physical_extents(self, extents)
    }

    fn fixup_dims(self, dims: &mut [Dim], rounded: &[usize]) {
        if dims.len() != 4 {
            return;
        }
        match self {
            WeightsLayout::IYxsOsYxsv2Osv16 => {
                dims[3].pitch = round_up(dims[1].v * dims[2].v, 2) * dims[1].pitch;
                dims[2].pad.after = rounded[2] - dims[2].v;
            }
            WeightsLayout::IyXsOsXsv2Osv16Ao32 | WeightsLayout::IyXsOsXsv2Osv8Ao32 => {
                dims[2].pitch = round_up(dims[1].v, 2) * dims[1].pitch;
                dims[1].pad.after = rounded[1] - dims[1].v;
                dims[3].pitch = dims[2].v * dims[2].pitch;
                dims[2].pad.after = rounded[2] - dims[2].v;
            }
            _ => {}
        }
    }
}

impl ElementType for Datatype {
    fn size_in_bytes(self) -> usize {
        Datatype::size_in_bytes(self)
    }

    fn cl_type(self) -> &'static str {
        Datatype::cl_type(self)
    }

    fn name(self) -> &'static str {
        self.as_str()
    }
}

impl ElementType for WeightsType {
    fn size_in_bytes(self) -> usize {
        WeightsType::size_in_bytes(self)
    }

    fn cl_type(self) -> &'static str {
        WeightsType::cl_type(self)
    }

    fn name(self) -> &'static str {
        self.as_str()
    }
}

/// Immutable tensor descriptor. Dims are ordered innermost first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorDesc<L, T> {
    dims: Vec<Dim>,
    dtype: T,
    layout: L,
    view_offset: usize,
    physical_size: usize,
}

pub type DataTensor = TensorDesc<DataLayout, Datatype>;
pub type WeightsTensor = TensorDesc<WeightsLayout, WeightsType>;

impl<L: TensorLayout, T: ElementType> TensorDesc<L, T> {
    /// Dense tensor over logical extents. Blocked layouts pick up physical-only padding.
    pub fn from_extents(extents: &[usize], dtype: T, layout: L) -> Self {
        let rounded = layout.physical_extents(extents);
        let mut dims = Vec::with_capacity(extents.len());
        let mut pitch = 1usize;
        for (v, padded) in extents.iter().zip(rounded.iter()) {
            dims.push(Dim::new(*v, pitch, Pad::new(0, padded - v)));
            pitch *= padded;
        }
        layout.fixup_dims(&mut dims, &rounded);
        Self::from_dims(dims, dtype, layout, 0, None)
    }

    /// Tensor with caller-supplied pitches. A missing physical size is derived from the dims.
    pub fn from_dims(
        dims: Vec<Dim>,
        dtype: T,
        layout: L,
        view_offset: usize,
        physical_size: Option<usize>,
    ) -> Self {
        let physical_size = physical_size.unwrap_or_else(|| {
            let extent = dims
                .iter()
                .map(|d| d.pitch * d.logical_dim_padded())
                .max()
                .unwrap_or(0);
            view_offset + extent
        });
        Self {
            dims,
            dtype,
            layout,
            view_offset,
            physical_size,
        }
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    pub fn dtype(&self) -> T {
        self.dtype
    }

    pub fn layout(&self) -> L {
        self.layout
    }

    pub fn view_offset(&self) -> usize {
        self.view_offset
    }

    pub fn physical_size(&self) -> usize {
        self.physical_size
    }

    pub fn physical_size_in_bytes(&self) -> usize {
        self.physical_size * self.dtype.size_in_bytes()
    }

    pub fn logical_size(&self) -> usize {
        if self.dims.is_empty() {
            return 0;
        }
        self.dims.iter().map(|d| d.v).product()
    }

    pub fn first_element_offset(&self) -> usize {
        self.view_offset
            + self
                .dims
                .iter()
                .map(|d| d.pitch * d.pad.before)
                .sum::<usize>()
    }

    pub fn padding_exists(&self) -> bool {
        self.dims.iter().any(|d| d.pad.total() != 0)
    }

    pub fn pitches_differ_from_logical_dims(&self) -> bool {
        let mut expected = 1usize;
        let mut differ = false;
        for dim in &self.dims {
            differ |= dim.pitch != expected;
            expected *= dim.v;
        }
        differ
    }

    pub fn simple_layout(&self) -> bool {
        self.layout.is_simple()
    }

    /// Same layout and extents; pitches and padding may differ.
    pub fn same_dims(&self, other: &Self) -> bool {
        self.layout == other.layout
            && self.dims.len() == other.dims.len()
            && self.dims.iter().zip(&other.dims).all(|(a, b)| a.v == b.v)
    }

    pub(crate) fn with_dims(&self, dims: Vec<Dim>) -> Self {
        Self::from_dims(dims, self.dtype, self.layout, self.view_offset, None)
    }
}

impl DataTensor {
    pub fn channel(&self, channel: DataChannel) -> Dim {
        self.layout
            .channel_index(channel)
            .and_then(|idx| self.dims.get(idx).copied())
            .unwrap_or_default()
    }

    pub fn x(&self) -> Dim {
        self.channel(DataChannel::X)
    }

    pub fn y(&self) -> Dim {
        self.channel(DataChannel::Y)
    }

    pub fn feature(&self) -> Dim {
        self.channel(DataChannel::Feature)
    }

    pub fn roi(&self) -> Dim {
        self.channel(DataChannel::Roi)
    }

    pub fn batch(&self) -> Dim {
        self.channel(DataChannel::Batch)
    }

    /// Dense tensor in `layout` over this tensor's logical extents.
    pub fn transform_ignore_padding(&self, layout: DataLayout) -> Option<DataTensor> {
        let src = self.layout.channel_count();
        let dst = layout.channel_count();
        let mut extents = vec![1usize; dst];
        let mut set = |channel: DataChannel, v: usize| -> Option<()> {
            let idx = layout.channel_index(channel)?;
            extents[idx] = v;
            Some(())
        };
        match (src, dst) {
            (2, 2) => {
                set(DataChannel::Feature, self.feature().v)?;
                set(DataChannel::Batch, self.batch().v)?;
            }
            (4, 4) => {
                set(DataChannel::X, self.x().v)?;
                set(DataChannel::Y, self.y().v)?;
                set(DataChannel::Feature, self.feature().v)?;
                set(DataChannel::Batch, self.batch().v)?;
            }
            (2, 4) => {
                set(DataChannel::Feature, self.feature().v)?;
                set(DataChannel::Batch, self.batch().v)?;
            }
            (4, 2) => {
                let flat = self.feature().v * self.x().v * self.y().v;
                set(DataChannel::Feature, flat)?;
                set(DataChannel::Batch, self.batch().v)?;
            }
            _ => return None,
        }
        Some(DataTensor::from_extents(&extents, self.dtype, layout))
    }

    /// Views feature and spatial axes as one feature axis. `None` when padding prevents it.
    pub fn flatten_feature_and_spatials(&self) -> Option<DataTensor> {
        let x = self.x();
        let y = self.y();
        let f = self.feature();
        let b = self.batch();
        let target = match self.layout {
            DataLayout::Bf | DataLayout::Fb => return Some(self.clone()),
            DataLayout::Bfyx | DataLayout::Fyxb => {
                if f.pitch != y.v * x.v * x.pitch {
                    return None;
                }
                if self.layout == DataLayout::Fyxb {
                    DataLayout::Fb
                } else {
                    DataLayout::Bf
                }
            }
            DataLayout::Byxf | DataLayout::Yxfb => {
                let yx_only = x.pitch == f.pitch && y.pitch == x.v * x.pitch;
                let feature_only =
                    y.v == 1 && x.v == 1 && x.pitch == f.pitch && y.pitch == f.pitch;
                if !(yx_only || feature_only) {
                    return None;
                }
                if self.layout == DataLayout::Yxfb {
                    DataLayout::Fb
                } else {
                    DataLayout::Bf
                }
            }
            _ => return None,
        };

        let flat = self.transform_ignore_padding(target)?;
        let mut dims = flat.dims().to_vec();
        if target == DataLayout::Bf {
            let idx = target.channel_index(DataChannel::Batch)?;
            dims[idx].pitch = b.pitch;
            dims[idx].pad = b.pad;
        } else {
            let idx = target.channel_index(DataChannel::Feature)?;
            let batch_idx = target.channel_index(DataChannel::Batch)?;
            let source = self.dims.get(batch_idx + 1)?;
            dims[idx].pitch = source.pitch;
            dims[idx].pad = source.pad;
        }
        Some(flat.with_dims(dims))
    }
}

impl WeightsTensor {
    pub fn channel(&self, channel: WeightsChannel) -> Dim {
        self.layout
            .channel_index(channel)
            .and_then(|idx| self.dims.get(idx).copied())
            .unwrap_or_default()
    }

    pub fn x(&self) -> Dim {
        self.channel(WeightsChannel::X)
    }

    pub fn y(&self) -> Dim {
        self.channel(WeightsChannel::Y)
    }

    pub fn ifm(&self) -> Dim {
        self.channel(WeightsChannel::Ifm)
    }

    pub fn ofm(&self) -> Dim {
        self.channel(WeightsChannel::Ofm)
    }

    pub fn transform_ignore_padding(
        &self,
        layout: WeightsLayout,
        dtype: WeightsType,
    ) -> Option<WeightsTensor> {
        let src = self.layout.channel_count();
        let dst = layout.channel_count();
        let mut extents = vec![1usize; dst];
        let mut set = |channel: WeightsChannel, v: usize| -> Option<()> {
            let idx = layout.channel_index(channel)?;
            extents[idx] = v;
            Some(())
        };
        match (src, dst) {
            (2, 2) | (2, 4) => {
                set(WeightsChannel::Ifm, self.ifm().v)?;
                set(WeightsChannel::Ofm, self.ofm().v)?;
            }
            (4, 4) => {
                set(WeightsChannel::X, self.x().v)?;
                set(WeightsChannel::Y, self.y().v)?;
                set(WeightsChannel::Ifm, self.ifm().v)?;
                set(WeightsChannel::Ofm, self.ofm().v)?;
            }
            (4, 2) => {
                let flat = self.ifm().v * self.x().v * self.y().v;
                set(WeightsChannel::Ifm, flat)?;
                set(WeightsChannel::Ofm, self.ofm().v)?;
            }
            _ => return None,
        }
        Some(WeightsTensor::from_extents(&extents, dtype, layout))
    }
}
