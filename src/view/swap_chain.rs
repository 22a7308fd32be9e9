//! Runtime swap chains imported into the graphics backend.

use crate::backend::{GraphicsBackend, NodeMask, TextureDescriptor, TextureHandle, TextureUsage};
use crate::error::{ClientError, ClientResult};
use crate::runtime::{GraphicsApi, Runtime, SwapChainConfig, SwapChainFormat, SwapChainId};

/// Images per swap chain.
pub const SWAP_CHAIN_TEXTURES: i32 = 3;

/// A runtime-owned ring of textures and their backend handles.
///
/// At most one image is acquired at a time.
#[derive(Debug)]
pub struct SwapChain {
    id: SwapChainId,
    config: SwapChainConfig,
    images: Vec<TextureHandle>,
    acquired: Option<u32>,
    label: String,
}

impl SwapChain {
    /// Atlas-sized configuration with the default image count.
    pub fn config(format: SwapChainFormat, width: i32, height: i32) -> SwapChainConfig {
        SwapChainConfig {
            texture_format: format,
            texture_width: width,
            texture_height: height,
            number_of_textures: SWAP_CHAIN_TEXTURES,
            texture_array_size: 1,
        }
    }

    /// Create the chain in the runtime and import every image.
    ///
    /// Failures are fatal: a chain that cannot be imported cannot be rendered to.
    pub fn create<B: GraphicsBackend + ?Sized>(
        runtime: &dyn Runtime,
        backend: &mut B,
        api: GraphicsApi,
        config: SwapChainConfig,
        node_mask: NodeMask,
        label: &str,
    ) -> ClientResult<Self> {
        let id = runtime
            .create_swap_chain(api, &config)
            .map_err(ClientError::SwapChainImport)?;

        let usage = if config.texture_format.is_depth() {
            TextureUsage::RENDER_ATTACHMENT
        } else {
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC | TextureUsage::TEXTURE_BINDING
        };

        let mut images = Vec::with_capacity(config.number_of_textures as usize);
        for index in 0..config.number_of_textures as u32 {
            let imported = runtime
                .swap_chain_image(id, index)
                .map_err(ClientError::SwapChainImport)
                .and_then(|native| {
                    let desc = TextureDescriptor::new(
                        format!("{label}_{index}"),
                        config.texture_width as u32,
                        config.texture_height as u32,
                        config.texture_format.into(),
                    )
                    .with_usage(usage)
                    .with_node_mask(node_mask);
                    Ok(backend.import_texture(native, &desc)?)
                });
            match imported {
                Ok(texture) => images.push(texture),
                Err(e) => {
                    for texture in images {
                        backend.destroy_texture(texture);
                    }
                    runtime.free_swap_chain(id);
                    return Err(e);
                }
            }
        }

        log::info!(
            "Created {} swap chain {}: {}x{} {:?}",
            label,
            id.0,
            config.texture_width,
            config.texture_height,
            config.texture_format
        );
        Ok(Self {
            id,
            config,
            images,
            acquired: None,
            label: label.to_string(),
        })
    }

    pub fn id(&self) -> SwapChainId {
        self.id
    }

    pub fn swap_chain_config(&self) -> &SwapChainConfig {
        &self.config
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn size(&self) -> (i32, i32) {
        (self.config.texture_width, self.config.texture_height)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image(&self, index: u32) -> Option<TextureHandle> {
        self.images.get(index as usize).copied()
    }

    /// Index of the image currently acquired.
    pub fn acquired_index(&self) -> Option<u32> {
        self.acquired
    }

    /// The image currently acquired.
    pub fn current_image(&self) -> Option<TextureHandle> {
        self.acquired.and_then(|index| self.image(index))
    }

    pub fn acquire(&mut self, runtime: &dyn Runtime) -> ClientResult<u32> {
        if let Some(index) = self.acquired {
            log::warn!("{} swap chain image {} already acquired", self.label, index);
            return Ok(index);
        }
        let index = runtime
            .acquire_swap_chain_image(self.id)
            .map_err(|e| ClientError::runtime("AcquireSwapChainImage", e))?;
        self.acquired = Some(index);
        Ok(index)
    }

    /// Release the acquired image. Does nothing if none is held.
    pub fn release(&mut self, runtime: &dyn Runtime) -> ClientResult<()> {
        if self.acquired.take().is_none() {
            return Ok(());
        }
        runtime
            .release_swap_chain_image(self.id)
            .map_err(|e| ClientError::runtime("ReleaseSwapChainImage", e))
    }

    pub fn destroy<B: GraphicsBackend + ?Sized>(mut self, runtime: &dyn Runtime, backend: &mut B) {
        if let Err(e) = self.release(runtime) {
            log::error!("Releasing {} swap chain failed: {e}", self.label);
        }
        for texture in self.images.drain(..) {
            backend.destroy_texture(texture);
        }
        runtime.free_swap_chain(self.id);
        log::debug!("Freed {} swap chain {}", self.label, self.id.0);
    }
}
