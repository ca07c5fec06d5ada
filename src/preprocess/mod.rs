//! Per-modality edge extraction.
//!
//! * [`preprocess_ir`] computes IR gradients, used only to gate depth edges.
//! * [`preprocess_depth`] finds depth edges, suppresses the non-maximal and
//!   weak ones, refines the survivors to sub-pixel positions and de-projects
//!   them to the 3D vertex set that anchors the optimization.
//! * [`preprocess_yuy`] extracts luminance from the packed color frames and
//!   builds the IDT field the cost samples, together with its gradients.
//!
//! All outputs are read-only once built.

pub mod depth;
pub mod ir;
pub mod yuy;

pub use depth::{edge_weight, preprocess_depth, subpixel_offset, DepthFrameData, EdgeVertex};
pub use ir::{preprocess_ir, IrFrameData};
pub use yuy::{
    count_changed_pixels, detect_movement, luminance_from_yuy2, preprocess_yuy, MovementData,
    YuyFrameData,
};
