//! The server as a whole: binding, the accept loop and the shutdown sequence.
//!
//! [`supervisor::IngestServer`] ties together the pieces in the sibling
//! modules. It owns the Shutdown Flag (a `CancellationToken`) and is the only
//! component that acts on it; everything else just raises it or observes it.

pub mod supervisor;
