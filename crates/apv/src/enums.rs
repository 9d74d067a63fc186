//! Bitstream-level enumerations.

use nutype_enum::nutype_enum;

nutype_enum! {
    /// Picture bitstream unit types.
    ///
    /// Every PBU in an access unit carries one of these in its header. All
    /// other values are reserved and rejected by the parser.
    pub enum PbuType(u8) {
        /// The primary coded frame of the access unit.
        PrimaryFrame = 1,
        /// An additional coded frame that is not the primary one.
        NonPrimaryFrame = 2,
        /// A reduced-resolution preview frame.
        PreviewFrame = 25,
        /// A depth-map frame.
        DepthFrame = 26,
        /// An alpha-plane frame.
        AlphaFrame = 27,
        /// The access-unit information unit describing every frame that
        /// follows.
        AuInfo = 65,
        /// A metadata unit carrying payloads for one group.
        Metadata = 66,
        /// Filler bytes for constant-bitrate padding.
        Filler = 67,
    }
}

impl PbuType {
    /// Whether this unit carries a coded frame.
    pub fn is_frame(self) -> bool {
        self == PbuType::PrimaryFrame
            || self == PbuType::NonPrimaryFrame
            || self == PbuType::PreviewFrame
            || self == PbuType::DepthFrame
            || self == PbuType::AlphaFrame
    }

    /// Whether this value is one of the defined unit types.
    pub fn is_valid(self) -> bool {
        self.is_frame() || self == PbuType::AuInfo || self == PbuType::Metadata || self == PbuType::Filler
    }
}

nutype_enum! {
    /// The `chroma_format_idc` of a frame.
    ///
    /// Value 1 (4:2:0) is reserved by the format and rejected at parse
    /// time; values 5 and above are malformed.
    pub enum ChromaFormat(u8) {
        /// 4:0:0, luma only.
        Monochrome = 0,
        /// Reserved. 4:2:0 material is not representable.
        Reserved420 = 1,
        /// 4:2:2, chroma width halved.
        Yuv422 = 2,
        /// 4:4:4.
        Yuv444 = 3,
        /// 4:4:4:4, three color components plus alpha.
        Yuv4444 = 4,
    }
}

impl ChromaFormat {
    /// Whether this value names a codable chroma format.
    pub fn is_valid(self) -> bool {
        self == ChromaFormat::Monochrome
            || self == ChromaFormat::Yuv422
            || self == ChromaFormat::Yuv444
            || self == ChromaFormat::Yuv4444
    }

    /// Number of coded components.
    pub fn num_comps(self) -> usize {
        if self == ChromaFormat::Monochrome {
            1
        } else if self == ChromaFormat::Yuv4444 {
            4
        } else {
            3
        }
    }

    /// Horizontal subsampling shift of the given component.
    pub fn shift_x(self, comp: usize) -> u32 {
        if self == ChromaFormat::Yuv422 && (comp == 1 || comp == 2) { 1 } else { 0 }
    }
}

nutype_enum! {
    /// Coding profiles.
    pub enum Profile(u8) {
        /// 4:2:2 sampling at 10-bit depth.
        Yuv422_10 = 33,
        /// 4:2:2 sampling at 12-bit depth.
        Yuv422_12 = 44,
        /// 4:0:0 sampling at 10-bit depth.
        Monochrome10 = 99,
    }
}

impl Profile {
    /// The chroma format this profile codes.
    pub fn chroma_format(self) -> Option<ChromaFormat> {
        if self == Profile::Yuv422_10 || self == Profile::Yuv422_12 {
            Some(ChromaFormat::Yuv422)
        } else if self == Profile::Monochrome10 {
            Some(ChromaFormat::Monochrome)
        } else {
            None
        }
    }

    /// The sample bit depth this profile codes.
    pub fn bit_depth(self) -> Option<u8> {
        if self == Profile::Yuv422_10 || self == Profile::Monochrome10 {
            Some(10)
        } else if self == Profile::Yuv422_12 {
            Some(12)
        } else {
            None
        }
    }
}

nutype_enum! {
    /// Metadata payload kinds.
    ///
    /// Kinds other than the ones below are carried opaquely.
    pub enum MetadataKind(u32) {
        /// ITU-T T.35 registered user data.
        ItuTT35 = 4,
        /// Mastering display colour volume, exactly 24 bytes.
        MasteringDisplayColourVolume = 5,
        /// Content light level, exactly 4 bytes.
        ContentLightLevel = 6,
        /// Filler payload.
        Filler = 10,
        /// User-defined payload keyed by its leading 16-byte UUID.
        UserDefined = 170,
    }
}

#[cfg(test)]
#[cfg_attr(all(test, coverage_nightly), coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn pbu_type_classes() {
        assert!(PbuType::PrimaryFrame.is_frame());
        assert!(PbuType::AlphaFrame.is_frame());
        assert!(!PbuType::AuInfo.is_frame());
        assert!(PbuType::Filler.is_valid());
        assert!(!PbuType::from(0).is_valid());
        assert!(!PbuType::from(24).is_valid());
        assert!(!PbuType::from(68).is_valid());
    }

    #[test]
    fn chroma_format_geometry() {
        assert_eq!(ChromaFormat::Monochrome.num_comps(), 1);
        assert_eq!(ChromaFormat::Yuv422.num_comps(), 3);
        assert_eq!(ChromaFormat::Yuv4444.num_comps(), 4);
        assert_eq!(ChromaFormat::Yuv422.shift_x(0), 0);
        assert_eq!(ChromaFormat::Yuv422.shift_x(1), 1);
        assert_eq!(ChromaFormat::Yuv444.shift_x(1), 0);
        assert!(!ChromaFormat::Reserved420.is_valid());
    }

    #[test]
    fn profile_bindings() {
        assert_eq!(Profile::Yuv422_10.chroma_format(), Some(ChromaFormat::Yuv422));
        assert_eq!(Profile::Yuv422_12.bit_depth(), Some(12));
        assert_eq!(Profile::Monochrome10.chroma_format(), Some(ChromaFormat::Monochrome));
        assert_eq!(Profile::from(7).bit_depth(), None);
    }
}
