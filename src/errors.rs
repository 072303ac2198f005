//! Error Types
//!
//! This module defines the error types used throughout the engine.
//!
//! # Overview
//!
//! The main error type [`CanopyError`] covers:
//! - Scene-graph topology violations (cyclic parenting, stale handles)
//! - Resource registry invariant violations (negative reference counters)
//! - GPU resource creation and read-back failures
//! - Device start-up failures
//!
//! # Usage
//!
//! All fallible public APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, CanopyError>`.
//!
//! ```rust,ignore
//! use canopy::errors::Result;
//!
//! fn attach(scene: &mut Scene, parent: NodeHandle, child: NodeHandle) -> Result<()> {
//!     scene.append_child(parent, child)?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

use crate::scene::NodeHandle;

/// The main error type for the engine.
#[derive(Error, Debug)]
pub enum CanopyError {
    // ========================================================================
    // Scene Graph Errors
    // ========================================================================
    /// Appending `child` below `parent` would make a node its own descendant.
    #[error("Cyclic reference: {child:?} is {parent:?} or one of its ancestors")]
    CyclicReference {
        /// The prospective parent
        parent: NodeHandle,
        /// The node that was about to be appended
        child: NodeHandle,
    },

    /// The handle does not resolve to a live node.
    #[error("Node not found: {0:?}")]
    NodeNotFound(NodeHandle),

    /// A viewport's camera node carries no camera component.
    #[error("Node {0:?} has no camera component")]
    MissingCamera(NodeHandle),

    // ========================================================================
    // Resource Registry Errors
    // ========================================================================
    /// A reference counter was released while already at zero.
    ///
    /// This is a double-release in calling code and is never recovered.
    #[error("Negative reference counter for {kind} resource {key}")]
    NegativeReferenceCount {
        /// Resource family (program, coat, buffers)
        kind: &'static str,
        /// Debug rendering of the resource key
        key: String,
    },

    /// The backend could not create a GPU resource.
    #[error("Failed to create {kind}: device error {code}")]
    ResourceCreation {
        /// What was being created
        kind: &'static str,
        /// Last error reported by the device
        code: String,
    },

    /// A backend handle no longer resolves.
    #[error("Unknown {kind} handle")]
    UnknownResource {
        /// Resource family of the stale handle
        kind: &'static str,
    },

    // ========================================================================
    // Picking Errors
    // ========================================================================
    /// The pick position lies outside the viewport rectangle.
    #[error("Pick position ({x}, {y}) lies outside the viewport rectangle")]
    PickOutOfBounds {
        /// Horizontal position relative to the rectangle
        x: u32,
        /// Vertical position relative to the rectangle
        y: u32,
    },

    /// Mapping the read-back buffer failed.
    #[error("Buffer map failed: {0}")]
    BufferMapFailed(#[from] wgpu::BufferAsyncError),

    /// Waiting for the device to finish the copy failed.
    #[error("Device poll failed: {0}")]
    DevicePollFailed(String),

    /// The map callback was dropped before reporting.
    #[error("Read-back channel closed before the map completed")]
    ReadbackChannelClosed,

    // ========================================================================
    // GPU Start-up Errors
    // ========================================================================
    /// Failed to request a compatible GPU adapter.
    #[error("Failed to request WGPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// Failed to create the GPU device.
    #[error("Failed to create WGPU device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),
}

/// Alias for `Result<T, CanopyError>`.
pub type Result<T> = std::result::Result<T, CanopyError>;
