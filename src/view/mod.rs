//! Swap chains, layers and the viewport atlas they are rendered into.

pub mod multi_layer_view;
pub mod swap_chain;
pub mod viewport;

pub use multi_layer_view::{Layer, LayerConfig, MultiLayerView, ViewSubmission, MIRROR_EYE_WIDTH};
pub use swap_chain::{SwapChain, SWAP_CHAIN_TEXTURES};
pub use viewport::{ViewportLayout, ViewportSets, MAX_VIEWPORT_SIZE, MIN_VIEWPORT_SIZE};
