use crate::boxes::FourCC;

/// Typed view over the MP4 / ISOBMFF boxes the walker understands without a schema.
///
/// Anything not in this list becomes `KnownBox::Unknown(fourcc)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownBox {
    // File-level / top-level
    Ftyp,
    Moov,
    Mdat,
    Free,
    Skip,
    Wide,
    Meta,
    Sidx,
    Styp,
    Moof,
    Mfra,

    // moov children
    Mvhd,
    Trak,
    Mvex,
    Udta,

    // trak children
    Tkhd,
    Edts,
    Mdia,
    Tref,

    // edts children
    Elst,

    // mdia children
    Mdhd,
    Hdlr,
    Minf,

    // minf children
    Vmhd,
    Smhd,
    Nmhd,
    Dinf,
    Stbl,

    // dinf children
    Dref,
    Url,

    // stbl children
    Stsd,
    Stts,
    Ctts,
    Stsc,
    Stsz,
    Stco,
    Co64,
    Stss,
    Sdtp,

    // fragments
    Mfhd,
    Traf,
    Tfhd,
    Tfdt,
    Trun,
    Trex,
    Mehd,

    // sample entries and their configuration
    Avc1,
    Avc3,
    Hev1,
    Hvc1,
    Mp4v,
    Mp4a,
    Avcc,
    Esds,
    Pasp,
    Btrt,
    Colr,

    // user data
    Auth,
    Cprt,
    Titl,
    Dscp,
    Gpmf,
    Ilst,

    // Anything else
    Unknown(FourCC),
}

impl From<FourCC> for KnownBox {
    fn from(cc: FourCC) -> Self {
        match &cc.0 {
            b"ftyp" => KnownBox::Ftyp,
            b"moov" => KnownBox::Moov,
            b"mdat" => KnownBox::Mdat,
            b"free" => KnownBox::Free,
            b"skip" => KnownBox::Skip,
            b"wide" => KnownBox::Wide,
            b"meta" => KnownBox::Meta,
            b"sidx" => KnownBox::Sidx,
            b"styp" => KnownBox::Styp,
            b"moof" => KnownBox::Moof,
            b"mfra" => KnownBox::Mfra,

            b"mvhd" => KnownBox::Mvhd,
            b"trak" => KnownBox::Trak,
            b"mvex" => KnownBox::Mvex,
            b"udta" => KnownBox::Udta,

            b"tkhd" => KnownBox::Tkhd,
            b"edts" => KnownBox::Edts,
            b"mdia" => KnownBox::Mdia,
            b"tref" => KnownBox::Tref,

            b"elst" => KnownBox::Elst,

            b"mdhd" => KnownBox::Mdhd,
            b"hdlr" => KnownBox::Hdlr,
            b"minf" => KnownBox::Minf,

            b"vmhd" => KnownBox::Vmhd,
            b"smhd" => KnownBox::Smhd,
            b"nmhd" => KnownBox::Nmhd,
            b"dinf" => KnownBox::Dinf,
            b"stbl" => KnownBox::Stbl,

            b"dref" => KnownBox::Dref,
            b"url " => KnownBox::Url,

            b"stsd" => KnownBox::Stsd,
            b"stts" => KnownBox::Stts,
            b"ctts" => KnownBox::Ctts,
            b"stsc" => KnownBox::Stsc,
            b"stsz" => KnownBox::Stsz,
            b"stco" => KnownBox::Stco,
            b"co64" => KnownBox::Co64,
            b"stss" => KnownBox::Stss,
            b"sdtp" => KnownBox::Sdtp,

            b"mfhd" => KnownBox::Mfhd,
            b"traf" => KnownBox::Traf,
            b"tfhd" => KnownBox::Tfhd,
            b"tfdt" => KnownBox::Tfdt,
            b"trun" => KnownBox::Trun,
            b"trex" => KnownBox::Trex,
            b"mehd" => KnownBox::Mehd,

            b"avc1" => KnownBox::Avc1,
            b"avc3" => KnownBox::Avc3,
            b"hev1" => KnownBox::Hev1,
            b"hvc1" => KnownBox::Hvc1,
            b"mp4v" => KnownBox::Mp4v,
            b"mp4a" => KnownBox::Mp4a,
            b"avcC" => KnownBox::Avcc,
            b"esds" => KnownBox::Esds,
            b"pasp" => KnownBox::Pasp,
            b"btrt" => KnownBox::Btrt,
            b"colr" => KnownBox::Colr,

            b"auth" => KnownBox::Auth,
            b"cprt" => KnownBox::Cprt,
            b"titl" => KnownBox::Titl,
            b"dscp" => KnownBox::Dscp,
            b"GPMF" => KnownBox::Gpmf,
            b"ilst" => KnownBox::Ilst,

            _ => KnownBox::Unknown(cc),
        }
    }
}

impl KnownBox {
    /// Human-readable box name.
    pub fn full_name(&self) -> &'static str {
        match self {
            KnownBox::Ftyp => "File Type Box",
            KnownBox::Moov => "Movie Box",
            KnownBox::Mdat => "Media Data Box",
            KnownBox::Free => "Free Space Box",
            KnownBox::Skip => "Skip Box",
            KnownBox::Wide => "Wide Box",
            KnownBox::Meta => "Meta Box",
            KnownBox::Sidx => "Segment Index Box",
            KnownBox::Styp => "Segment Type Box",
            KnownBox::Moof => "Movie Fragment Box",
            KnownBox::Mfra => "Movie Fragment Random Access Box",
            KnownBox::Mvhd => "Movie Header Box",
            KnownBox::Trak => "Track Box",
            KnownBox::Mvex => "Movie Extends Box",
            KnownBox::Udta => "User Data Box",
            KnownBox::Tkhd => "Track Header Box",
            KnownBox::Edts => "Edit Box",
            KnownBox::Mdia => "Media Box",
            KnownBox::Tref => "Track Reference Box",
            KnownBox::Elst => "Edit List Box",
            KnownBox::Mdhd => "Media Header Box",
            KnownBox::Hdlr => "Handler Reference Box",
            KnownBox::Minf => "Media Information Box",
            KnownBox::Vmhd => "Video Media Header Box",
            KnownBox::Smhd => "Sound Media Header Box",
            KnownBox::Nmhd => "Null Media Header Box",
            KnownBox::Dinf => "Data Information Box",
            KnownBox::Stbl => "Sample Table Box",
            KnownBox::Dref => "Data Reference Box",
            KnownBox::Url => "Data Entry URL Box",
            KnownBox::Stsd => "Sample Description Box",
            KnownBox::Stts => "Decoding Time to Sample Box",
            KnownBox::Ctts => "Composition Time to Sample Box",
            KnownBox::Stsc => "Sample to Chunk Box",
            KnownBox::Stsz => "Sample Size Box",
            KnownBox::Stco => "Chunk Offset Box",
            KnownBox::Co64 => "64-bit Chunk Offset Box",
            KnownBox::Stss => "Sync Sample Box",
            KnownBox::Sdtp => "Independent and Disposable Samples Box",
            KnownBox::Mfhd => "Movie Fragment Header Box",
            KnownBox::Traf => "Track Fragment Box",
            KnownBox::Tfhd => "Track Fragment Header Box",
            KnownBox::Tfdt => "Track Fragment Decode Time Box",
            KnownBox::Trun => "Track Run Box",
            KnownBox::Trex => "Track Extends Box",
            KnownBox::Mehd => "Movie Extends Header Box",
            KnownBox::Avc1 | KnownBox::Avc3 => "AVC Sample Entry",
            KnownBox::Hev1 | KnownBox::Hvc1 => "HEVC Sample Entry",
            KnownBox::Mp4v => "MPEG-4 Visual Sample Entry",
            KnownBox::Mp4a => "MPEG-4 Audio Sample Entry",
            KnownBox::Avcc => "AVC Configuration Box",
            KnownBox::Esds => "Elementary Stream Descriptor Box",
            KnownBox::Pasp => "Pixel Aspect Ratio Box",
            KnownBox::Btrt => "Bit Rate Box",
            KnownBox::Colr => "Colour Information Box",
            KnownBox::Auth => "Author",
            KnownBox::Cprt => "Copyright Box",
            KnownBox::Titl => "Title",
            KnownBox::Dscp => "Description",
            KnownBox::Gpmf => "GoPro Metadata Format",
            KnownBox::Ilst => "Metadata Item List",
            KnownBox::Unknown(_) => "Unknown Box",
        }
    }

    /// Does this box *contain* child boxes and nothing else?
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            KnownBox::Moov
                | KnownBox::Trak
                | KnownBox::Mdia
                | KnownBox::Minf
                | KnownBox::Stbl
                | KnownBox::Edts
                | KnownBox::Udta
                | KnownBox::Dinf
                | KnownBox::Moof
                | KnownBox::Mvex
                | KnownBox::Mfra
                | KnownBox::Traf
                | KnownBox::Tref
        )
    }

    /// Is this a FullBox (version + flags)?
    pub fn is_full_box(&self) -> bool {
        matches!(
            self,
            KnownBox::Mvhd
                | KnownBox::Tkhd
                | KnownBox::Mdhd
                | KnownBox::Hdlr
                | KnownBox::Vmhd
                | KnownBox::Smhd
                | KnownBox::Nmhd
                | KnownBox::Dref
                | KnownBox::Url
                | KnownBox::Meta
                | KnownBox::Stsd
                | KnownBox::Stts
                | KnownBox::Ctts
                | KnownBox::Stsc
                | KnownBox::Stsz
                | KnownBox::Stco
                | KnownBox::Co64
                | KnownBox::Stss
                | KnownBox::Sdtp
                | KnownBox::Elst
                | KnownBox::Sidx
                | KnownBox::Mehd
                | KnownBox::Trex
                | KnownBox::Mfhd
                | KnownBox::Tfhd
                | KnownBox::Tfdt
                | KnownBox::Trun
                | KnownBox::Esds
                | KnownBox::Auth
                | KnownBox::Cprt
                | KnownBox::Titl
                | KnownBox::Dscp
        )
    }
}
