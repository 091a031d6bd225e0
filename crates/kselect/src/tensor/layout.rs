use serde::{Deserialize, Serialize};

/// Element type of a data tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Datatype {
    F16,
    F32,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
}

impl Datatype {
    pub const ALL: [Datatype; 8] = [
        Datatype::F16,
        Datatype::F32,
        Datatype::Int8,
        Datatype::Uint8,
        Datatype::Int16,
        Datatype::Uint16,
        Datatype::Int32,
        Datatype::Uint32,
    ];

    pub fn size_in_bytes(self) -> usize {
        match self {
            Datatype::Int8 | Datatype::Uint8 => 1,
            Datatype::F16 | Datatype::Int16 | Datatype::Uint16 => 2,
            Datatype::F32 | Datatype::Int32 | Datatype::Uint32 => 4,
        }
    }

    pub fn cl_type(self) -> &'static str {
        match self {
            Datatype::F16 => "half",
            Datatype::F32 => "float",
            Datatype::Int8 => "char",
            Datatype::Uint8 => "uchar",
            Datatype::Int16 => "short",
            Datatype::Uint16 => "ushort",
            Datatype::Int32 => "int",
            Datatype::Uint32 => "uint",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Datatype::F16 => "F16",
            Datatype::F32 => "F32",
            Datatype::Int8 => "INT8",
            Datatype::Uint8 => "UINT8",
            Datatype::Int16 => "INT16",
            Datatype::Uint16 => "UINT16",
            Datatype::Int32 => "INT32",
            Datatype::Uint32 => "UINT32",
        }
    }

    pub(crate) fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// Element type of a weights tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeightsType {
    F16,
    F32,
    Int8,
}

impl WeightsType {
    pub const ALL: [WeightsType; 3] = [WeightsType::F16, WeightsType::F32, WeightsType::Int8];

    pub fn size_in_bytes(self) -> usize {
        match self {
            WeightsType::Int8 => 1,
            WeightsType::F16 => 2,
            WeightsType::F32 => 4,
        }
    }

    pub fn cl_type(self) -> &'static str {
        match self {
            WeightsType::F16 => "half",
            WeightsType::F32 => "float",
            WeightsType::Int8 => "char",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WeightsType::F16 => "F16",
            WeightsType::F32 => "F32",
            WeightsType::Int8 => "INT8",
        }
    }

    pub(crate) fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataChannel {
    X,
    Y,
    Feature,
    Roi,
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeightsChannel {
    X,
    Y,
    Ifm,
    Ofm,
}

/// Memory order of a data tensor. Channel tables list dims innermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataLayout {
    Bf,
    Fb,
    Bfyx,
    Yxfb,
    Byxf,
    Fyxb,
    BsFBsv8Af8,
    BsFBsv16Af8,
    Brfyx,
    /// bfyx with the feature axis blocked in slices of 16.
    BfyxF16,
}

impl DataLayout {
    pub const ALL: [DataLayout; 10] = [
        DataLayout::Bf,
        DataLayout::Fb,
        DataLayout::Bfyx,
        DataLayout::Yxfb,
        DataLayout::Byxf,
        DataLayout::Fyxb,
        DataLayout::BsFBsv8Af8,
        DataLayout::BsFBsv16Af8,
        DataLayout::Brfyx,
        DataLayout::BfyxF16,
    ];

    pub fn channels(self) -> &'static [DataChannel] {
        use DataChannel::*;
        match self {
            DataLayout::Bf | DataLayout::BsFBsv8Af8 | DataLayout::BsFBsv16Af8 => &[Feature, Batch],
            DataLayout::Fb => &[Batch, Feature],
            DataLayout::Bfyx | DataLayout::BfyxF16 => &[X, Y, Feature, Batch],
            DataLayout::Yxfb => &[Batch, Feature, X, Y],
            DataLayout::Byxf => &[Feature, X, Y, Batch],
            DataLayout::Fyxb => &[Batch, X, Y, Feature],
            DataLayout::Brfyx => &[X, Y, Feature, Roi, Batch],
        }
    }

    pub fn channel_index(self, channel: DataChannel) -> Option<usize> {
        self.channels().iter().position(|c| *c == channel)
    }

    pub fn channel_count(self) -> usize {
        self.channels().len()
    }

    pub fn is_simple(self) -> bool {
        matches!(
            self,
            DataLayout::Bf
                | DataLayout::Fb
                | DataLayout::Bfyx
                | DataLayout::Yxfb
                | DataLayout::Byxf
                | DataLayout::Fyxb
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataLayout::Bf => "bf",
            DataLayout::Fb => "fb",
            DataLayout::Bfyx => "bfyx",
            DataLayout::Yxfb => "yxfb",
            DataLayout::Byxf => "byxf",
            DataLayout::Fyxb => "fyxb",
            DataLayout::BsFBsv8Af8 => "bs_f_bsv8__af8",
            DataLayout::BsFBsv16Af8 => "bs_f_bsv16__af8",
            DataLayout::Brfyx => "brfyx",
            DataLayout::BfyxF16 => "bfyx_f16",
        }
    }

    /// Physical extents the layout stores for the given logical extents.
    pub(crate) fn physical_extents(self, extents: &[usize]) -> Vec<usize> {
        let mut rounded = extents.to_vec();
        match self {
            DataLayout::BsFBsv8Af8 if rounded.len() == 2 => {
                rounded[0] = round_up(rounded[0], 8);
                rounded[1] = round_up(rounded[1], 8);
            }
            DataLayout::BsFBsv16Af8 if rounded.len() == 2 => {
                rounded[0] = round_up(rounded[0], 8);
                rounded[1] = round_up(rounded[1], 16);
            }
            DataLayout::BfyxF16 if rounded.len() == 4 => {
                rounded[2] = round_up(rounded[2], 16);
            }
            _ => {}
        }
        rounded
    }

    pub(crate) fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// Memory order of a weights tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeightsLayout {
    Oi,
    Io,
    Oiyx,
    Oyxi,
    Iyxo,
    Yxio,
    OsIyxOsv16,
    OsIOsv16,
    OsIOsv8Ai8,
    OsIOsv16Ai8,
    IYxsOsYxsv2Osv16,
    IyXsOsXsv2Osv16Ao32,
    IyXsOsXsv2Osv8Ao32,
    /// oiyx with both feature axes blocked in slices of 16.
    OIYxI16O16,
}

impl WeightsLayout {
    pub const ALL: [WeightsLayout; 14] = [
        WeightsLayout::Oi,
        WeightsLayout::Io,
        WeightsLayout::Oiyx,
        WeightsLayout::Oyxi,
        WeightsLayout::Iyxo,
        WeightsLayout::Yxio,
        WeightsLayout::OsIyxOsv16,
        WeightsLayout::OsIOsv16,
        WeightsLayout::OsIOsv8Ai8,
        WeightsLayout::OsIOsv16Ai8,
        WeightsLayout::IYxsOsYxsv2Osv16,
        WeightsLayout::IyXsOsXsv2Osv16Ao32,
        WeightsLayout::IyXsOsXsv2Osv8Ao32,
        WeightsLayout::OIYxI16O16,
    ];

    pub fn channels(self) -> &'static [WeightsChannel] {
        use WeightsChannel::*;
        match self {
            WeightsLayout::Oi
            | WeightsLayout::OsIOsv16
            | WeightsLayout::OsIOsv8Ai8
            | WeightsLayout::OsIOsv16Ai8 => &[Ifm, Ofm],
            WeightsLayout::Io => &[Ofm, Ifm],
            WeightsLayout::Oiyx | WeightsLayout::OsIyxOsv16 | WeightsLayout::OIYxI16O16 => {
                &[X, Y, Ifm, Ofm]
            }
            WeightsLayout::Oyxi => &[Ifm, X, Y, Ofm],
            WeightsLayout::Iyxo
            | WeightsLayout::IYxsOsYxsv2Osv16
            | WeightsLayout::IyXsOsXsv2Osv16Ao32
            | WeightsLayout::IyXsOsXsv2Osv8Ao32 => &[Ofm, X, Y, Ifm],
            WeightsLayout::Yxio => &[Ofm, Ifm, X, Y],
        }
    }

    pub fn channel_index(self, channel: WeightsChannel) -> Option<usize> {
        self.channels().iter().position(|c| *c == channel)
    }

    pub fn channel_count(self) -> usize {
        self.channels().len()
    }

    pub fn is_simple(self) -> bool {
        matches!(
            self,
            WeightsLayout::Oi
                | WeightsLayout::Io
                | WeightsLayout::Oiyx
                | WeightsLayout::Oyxi
                | WeightsLayout::Iyxo
                | WeightsLayout::Yxio
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WeightsLayout::Oi => "oi",
            WeightsLayout::Io => "io",
            WeightsLayout::Oiyx => "oiyx",
            WeightsLayout::Oyxi => "oyxi",
            WeightsLayout::Iyxo => "iyxo",
            WeightsLayout::Yxio => "yxio",
            WeightsLayout::OsIyxOsv16 => "os_iyx_osv16",
            WeightsLayout::OsIOsv16 => "os_i_osv16",
            WeightsLayout::OsIOsv8Ai8 => "os_i_osv8__ai8",
            WeightsLayout::OsIOsv16Ai8 => "os_i_osv16__ai8",
            WeightsLayout::IYxsOsYxsv2Osv16 => "i_yxs_os_yxsv2_osv16",
            WeightsLayout::IyXsOsXsv2Osv16Ao32 => "iy_xs_os_xsv2_osv16__ao32",
            WeightsLayout::IyXsOsXsv2Osv8Ao32 => "iy_xs_os_xsv2_osv8__ao32",
            WeightsLayout::OIYxI16O16 => "o_i_yx_i16_o16",
        }
    }

    pub(crate) fn physical_extents(self, extents: &[usize]) -> Vec<usize> {
        let mut rounded = extents.to_vec();
        match (self, rounded.len()) {
            (WeightsLayout::OsIyxOsv16, 4) => rounded[3] = round_up(rounded[3], 16),
            (WeightsLayout::OsIOsv8Ai8, 2) => {
                rounded[0] = round_up(rounded[0], 8);
                rounded[1] = round_up(rounded[1], 8);
            }
            (WeightsLayout::OsIOsv16Ai8, 2) => {
                rounded[0] = round_up(rounded[0], 8);
                rounded[1] = round_up(rounded[1], 16);
            }
            (WeightsLayout::OsIOsv16, 2) => rounded[1] = round_up(rounded[1], 16),
            (WeightsLayout::IYxsOsYxsv2Osv16, 4) => rounded[0] = round_up(rounded[0], 16),
            (WeightsLayout::IyXsOsXsv2Osv16Ao32, 4) | (WeightsLayout::IyXsOsXsv2Osv8Ao32, 4) => {
                rounded[0] = round_up(rounded[0], 32)
            }
            (WeightsLayout::OIYxI16O16, 4) => {
                rounded[2] = round_up(rounded[2], 16);
                rounded[3] = round_up(rounded[3], 16);
            }
            _ => {}
        }
        rounded
    }

    pub(crate) fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

pub fn round_up(value: usize, multiple: usize) -> usize {
    if multiple == 0 {
        return value;
    }
    value.div_ceil(multiple) * multiple
}

pub fn ceil_div(value: usize, divisor: usize) -> usize {
    if divisor == 0 {
        return 0;
    }
    value.div_ceil(divisor)
}
