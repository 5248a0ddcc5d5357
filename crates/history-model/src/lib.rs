//! Maplapse History Model
//!
//! Defines the data contracts shared by the timelapse pipeline:
//! - **History:** dated map samples ([`FrameRecord`]) and the query that selects them
//! - **Frame source:** the pull protocol used to read samples one at a time
//! - **Archive:** a file-backed history engine implementing that protocol
//! - **Codec:** encoder configuration, encoded packets, containers
//! - **Artifact:** the finished video buffer handed back to the caller

pub mod archive;
pub mod artifact;
pub mod codec;
pub mod history;
pub mod source;

pub use archive::*;
pub use artifact::*;
pub use codec::*;
pub use history::*;
pub use source::*;
