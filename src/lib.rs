pub mod annexb;
pub mod boxes;
pub mod codec;
pub mod error;
pub mod fields;
pub mod gpmf;
pub mod known_boxes;
pub mod mux;
pub mod parser;
pub mod registry;
pub mod schema;
pub mod sps;
pub mod text;
pub mod util;
pub mod verify;
pub mod walker;
pub mod writer;

pub use boxes::{BoxHeader, BoxNode, DecodeSource, FourCC, find_box};
pub use error::{Error, Result};
pub use mux::{FrameSource, MuxConfig, MuxReport, Muxer, VecFrameSource};
pub use parser::read_box_header;
pub use registry::{BoxValue, Registry, default_registry};
pub use schema::Schema;
pub use verify::{VerifyReport, verify_file};
pub use walker::{Scope, WalkOptions, Walker, walk_reader};
