//! purefood-sync: the PureFood recipe data pipeline.
//!
//! Downloads a single zip archive holding the recipe dataset and its images,
//! checks that every recipe has an image, transcodes images to bounded JPEGs,
//! and materializes both in a local directory that the rest of the
//! application reads synchronously. A failed sync never damages the previous
//! good copy.
//!
//! The pieces are wired together explicitly: build a [`store::LocalStore`],
//! hand it to a [`sync::SyncPipeline`] and a [`reader::DatasetReader`].

#![warn(clippy::all)]

pub mod archive;
pub mod export;
pub mod model;
pub mod reader;
pub mod retry;
pub mod store;
pub mod sync;
pub mod transcode;
pub mod validate;
