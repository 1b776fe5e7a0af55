//! Texture import, the texture cache and texel storage.
//!
//! The frontend side is [TextureCache], which maps a source address, format and size to a
//! backend texture id, and [import_texture], which expands a loaded tmem payload into RGBA8.
//! The backend side is [TexturePool], which keeps every uploaded texture in one growable
//! arena and samples it with one of nine nearest-neighbor wrap variants.

use crate::{
    backend::RenderingBackend,
    cmd::{ComponentSize, ImageFormat, Rgba32, TileWrap},
    error::GfxError,
    fixed::Fix64,
    memory::GfxMemory,
};

/// Largest number of backend texture slots.
pub const MAX_TEXTURES: usize = 3072;

const CACHE_POOL_SIZE: usize = 512;
const CACHE_BUCKETS: usize = 1024;
const ARENA_STEP: usize = 0x10000;

/// Identifies a decoded texture by where it was loaded from and how it was interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureKey {
    pub addr: u32,
    pub fmt: ImageFormat,
    pub siz: ComponentSize,
}

impl TextureKey {
    fn bucket(&self) -> usize {
        ((self.addr >> 5) & 0x3FF) as usize
    }
}

/// A cache entry, holding the sampler state last sent to the backend for its texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheNode {
    pub key: TextureKey,
    pub texture_id: u32,
    pub cms: TileWrap,
    pub cmt: TileWrap,
    pub linear_filter: bool,
    next: Option<usize>,
}

/// Chained hash map from [TextureKey] to backend texture ids.
///
/// Nodes come from a fixed pool. When it runs out the whole pool is invalidated at once
/// and reused from the start; nodes keep their backend texture id so slots are recycled.
#[derive(Debug, Clone)]
pub struct TextureCache {
    buckets: Vec<Option<usize>>,
    pool: Vec<CacheNode>,
    pool_pos: usize,
}

impl Default for TextureCache {
    fn default() -> Self {
        Self {
            buckets: vec![None; CACHE_BUCKETS],
            pool: Vec::with_capacity(CACHE_POOL_SIZE),
            pool_pos: 0,
        }
    }
}

impl TextureCache {
    #[allow(missing_docs)]
    pub fn node(&self, index: usize) -> &CacheNode {
        &self.pool[index]
    }

    #[allow(missing_docs)]
    pub fn node_mut(&mut self, index: usize) -> &mut CacheNode {
        &mut self.pool[index]
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.pool_pos
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.pool_pos == 0
    }

    /// Finds or creates the entry for `key` and selects its texture on `tile`.
    ///
    /// Returns the node index and whether it was a hit. On a miss the caller must upload
    /// the texture data.
    pub fn lookup<R: RenderingBackend + ?Sized>(
        &mut self,
        backend: &mut R,
        tile: usize,
        key: TextureKey,
    ) -> Result<(usize, bool), GfxError> {
        let bucket = key.bucket();
        let mut tail = None;
        let mut cursor = self.buckets[bucket];
        while let Some(index) = cursor.filter(|&i| i < self.pool_pos) {
            let node = &self.pool[index];
            if node.key == key {
                backend.select_texture(tile, node.texture_id);
                return Ok((index, true));
            }
            tail = Some(index);
            cursor = node.next;
        }

        if self.pool_pos == CACHE_POOL_SIZE {
            log::debug!("texture cache full, invalidating");
            self.pool_pos = 0;
            self.buckets.iter_mut().for_each(|b| *b = None);
            tail = None;
        }

        let index = self.pool_pos;
        self.pool_pos += 1;
        if index == self.pool.len() {
            let texture_id = backend.new_texture()?;
            self.pool.push(CacheNode {
                key,
                texture_id,
                cms: TileWrap::WRAP,
                cmt: TileWrap::WRAP,
                linear_filter: false,
                next: None,
            });
        }
        match tail {
            Some(tail) => self.pool[tail].next = Some(index),
            None => self.buckets[bucket] = Some(index),
        }

        let node = &mut self.pool[index];
        backend.select_texture(tile, node.texture_id);
        backend.set_sampler_parameters(tile, false, TileWrap::WRAP, TileWrap::WRAP);
        node.key = key;
        node.cms = TileWrap::WRAP;
        node.cmt = TileWrap::WRAP;
        node.linear_filter = false;
        node.next = None;
        Ok((index, false))
    }
}

/// A texture expanded to RGBA8.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedTexture {
    pub width: u32,
    pub height: u32,
    pub rgba8: Vec<u8>,
}

fn scale_5_8(v: u16) -> u8 {
    ((v & 0x1F) as u32 * 0xFF / 0x1F) as u8
}

fn rgba16_to_32(v: u16) -> [u8; 4] {
    [
        scale_5_8(v >> 11),
        scale_5_8(v >> 6),
        scale_5_8(v >> 1),
        if v & 1 != 0 { 0xFF } else { 0 },
    ]
}

/// The `i`th 4 bit texel, high nibble first.
fn nibble(data: &[u8], i: usize) -> u8 {
    (data[i / 2] >> (4 - (i % 2) * 4)) & 0xF
}

/// Reads `size_bytes` of texture data at `addr` and expands it to RGBA8.
///
/// `line_size_bytes` is the tmem line width of the render tile in bytes. `palette` is the
/// address of the RGBA16 lookup table used by CI textures.
pub fn import_texture<M: GfxMemory + ?Sized>(
    memory: &M,
    key: TextureKey,
    size_bytes: u32,
    line_size_bytes: u32,
    palette: u32,
) -> Result<DecodedTexture, GfxError> {
    use ComponentSize::*;
    use ImageFormat::*;

    let data = memory.read_bytes(key.addr, 0, size_bytes as usize)?;
    let rows = |bytes: u32| bytes.checked_div(line_size_bytes).unwrap_or(0);

    let (width, height, mut rgba8) = match (key.fmt, key.siz) {
        (Rgba, Bits16) => {
            let rgba8 = data
                .chunks_exact(2)
                .flat_map(|b| rgba16_to_32(u16::from_be_bytes([b[0], b[1]])))
                .collect();
            (line_size_bytes / 2, rows(size_bytes), rgba8)
        }
        (Rgba, Bits32) => (line_size_bytes / 2, rows(size_bytes / 2), data),
        (Ia, Bits4) => {
            let rgba8 = (0..data.len() * 2)
                .flat_map(|i| {
                    let part = nibble(&data, i);
                    let intensity = (part >> 1) * 0x24;
                    let alpha = if part & 1 != 0 { 0xFF } else { 0 };
                    [intensity, intensity, intensity, alpha]
                })
                .collect();
            (line_size_bytes * 2, rows(size_bytes), rgba8)
        }
        (Ia, Bits8) => {
            let rgba8 = data
                .iter()
                .flat_map(|&b| {
                    let intensity = (b >> 4) * 0x11;
                    [intensity, intensity, intensity, (b & 0xF) * 0x11]
                })
                .collect();
            (line_size_bytes, rows(size_bytes), rgba8)
        }
        (Ia, Bits16) => {
            let rgba8 = data
                .chunks_exact(2)
                .flat_map(|b| [b[0], b[0], b[0], b[1]])
                .collect();
            (line_size_bytes / 2, rows(size_bytes), rgba8)
        }
        (I, Bits4) => {
            let rgba8 = (0..data.len() * 2)
                .flat_map(|i| {
                    let intensity = nibble(&data, i) * 0x11;
                    [intensity, intensity, intensity, 0xFF]
                })
                .collect();
            (line_size_bytes * 2, rows(size_bytes), rgba8)
        }
        (I, Bits8) => {
            let rgba8 = data.iter().flat_map(|&i| [i, i, i, 0xFF]).collect();
            (line_size_bytes, rows(size_bytes), rgba8)
        }
        (Ci, Bits4) => {
            let mut tlut = [0u16; 16];
            memory.read_u16(&mut tlut, palette, 0)?;
            let rgba8 = (0..data.len() * 2)
                .flat_map(|i| rgba16_to_32(tlut[nibble(&data, i) as usize]))
                .collect();
            (line_size_bytes * 2, rows(size_bytes), rgba8)
        }
        (Ci, Bits8) => {
            let mut tlut = [0u16; 256];
            memory.read_u16(&mut tlut, palette, 0)?;
            let rgba8 = data
                .iter()
                .flat_map(|&i| rgba16_to_32(tlut[i as usize]))
                .collect();
            (line_size_bytes, rows(size_bytes), rgba8)
        }
        (fmt, siz) => return Err(GfxError::UnsupportedTextureFormat { fmt, siz }),
    };

    rgba8.resize((width * height * 4) as usize, 0);
    Ok(DecodedTexture {
        width,
        height,
        rgba8,
    })
}

/// Per axis texture coordinate wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WrapMode {
    Repeat,
    Clamp,
    /// Reflects negative coordinates once. Coordinates past the first period are clamped,
    /// so this only matches hardware mirroring within `(-size, size)`.
    Mirror,
}

impl Default for WrapMode {
    fn default() -> Self {
        Self::Repeat
    }
}

impl From<TileWrap> for WrapMode {
    fn from(m: TileWrap) -> Self {
        if m.clamp {
            WrapMode::Clamp
        } else if m.mirror {
            WrapMode::Mirror
        } else {
            WrapMode::Repeat
        }
    }
}

impl WrapMode {
    fn index(self) -> usize {
        match self {
            WrapMode::Repeat => 0,
            WrapMode::Clamp => 1,
            WrapMode::Mirror => 2,
        }
    }
}

/// Samples integer texel coordinates, applying the wrap mode of each axis.
pub type SampleFn = fn(&TextureHeader, &[u8], i32, i32) -> Rgba32;

fn clamp0w(x: i32, wrap: i32) -> i32 {
    if x < 0 {
        0
    } else if x > wrap {
        wrap
    } else {
        x
    }
}

fn wrap_coord<const MODE: usize>(x: i32, wrap: i32) -> i32 {
    match MODE {
        0 => x & wrap,
        1 => clamp0w(x, wrap),
        _ => clamp0w(x.wrapping_abs(), wrap),
    }
}

fn sample_nearest<const S: usize, const T: usize>(
    tex: &TextureHeader,
    arena: &[u8],
    x: i32,
    y: i32,
) -> Rgba32 {
    tex.texel(
        arena,
        wrap_coord::<S>(x, tex.wrap_w),
        wrap_coord::<T>(y, tex.wrap_h),
    )
}

/// Indexed by `[s][t]` wrap mode.
const SAMPLERS: [[SampleFn; 3]; 3] = [
    [
        sample_nearest::<0, 0>,
        sample_nearest::<0, 1>,
        sample_nearest::<0, 2>,
    ],
    [
        sample_nearest::<1, 0>,
        sample_nearest::<1, 1>,
        sample_nearest::<1, 2>,
    ],
    [
        sample_nearest::<2, 0>,
        sample_nearest::<2, 1>,
        sample_nearest::<2, 2>,
    ],
];

/// Where a texture lives in the arena and how it is sampled.
#[derive(Debug, Clone, Copy)]
pub struct TextureHeader {
    pub offset: usize,
    /// Bytes reserved in the arena at `offset`.
    pub capacity: usize,
    pub width: u32,
    pub height: u32,
    pub wrap_w: i32,
    pub wrap_h: i32,
    pub linear_filter: bool,
    pub sample: SampleFn,
}

impl Default for TextureHeader {
    fn default() -> Self {
        Self {
            offset: 0,
            capacity: 0,
            width: 0,
            height: 0,
            wrap_w: 0,
            wrap_h: 0,
            linear_filter: false,
            sample: SAMPLERS[0][0],
        }
    }
}

impl TextureHeader {
    fn texel(&self, arena: &[u8], x: i32, y: i32) -> Rgba32 {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return Rgba32::default();
        }
        let i = self.offset + 4 * (y as usize * self.width as usize + x as usize);
        match arena.get(i..i + 4) {
            Some(t) => Rgba32::new(t[0], t[1], t[2], t[3]),
            None => Rgba32::default(),
        }
    }
}

/// Texture slots and the arena holding their texels.
///
/// A re-upload reuses the slot's region when it fits. Otherwise the texels are appended
/// and the old region is abandoned.
#[derive(Debug, Clone, Default)]
pub struct TexturePool {
    headers: Vec<TextureHeader>,
    arena: Vec<u8>,
    current: [Option<usize>; 2],
    tmu: usize,
}

impl TexturePool {
    /// Allocates a texture slot.
    pub fn new_texture(&mut self) -> Result<u32, GfxError> {
        if self.headers.len() >= MAX_TEXTURES {
            return Err(GfxError::OutOfTextureSlots);
        }
        self.headers.push(TextureHeader::default());
        Ok((self.headers.len() - 1) as u32)
    }

    /// Binds `texture_id` to `tile` and makes `tile` the upload target.
    pub fn select(&mut self, tile: usize, texture_id: u32) {
        if let Some(slot) = self.current.get_mut(tile) {
            *slot = Some(texture_id as usize).filter(|&id| id < self.headers.len());
            self.tmu = tile;
        }
    }

    fn alloc(&mut self, size: usize) -> usize {
        let offset = self.arena.len();
        if offset + size > self.arena.capacity() {
            let cap = self.arena.capacity() + ARENA_STEP + size;
            let cap = (cap + ARENA_STEP - 1) / ARENA_STEP * ARENA_STEP;
            self.arena.reserve_exact(cap - offset);
        }
        self.arena.resize(offset + size, 0);
        offset
    }

    /// Copies RGBA8 texels into the texture bound to the upload tile.
    pub fn upload(&mut self, rgba8: &[u8], width: u32, height: u32) {
        let id = match self.current[self.tmu] {
            Some(id) => id,
            None => {
                log::warn!("texture upload with no texture selected");
                return;
            }
        };
        let size = (width * height * 4) as usize;
        let (offset, capacity) = match self.headers[id] {
            TextureHeader { offset, capacity, .. } if size <= capacity => (offset, capacity),
            _ => (self.alloc(size), size),
        };
        let n = size.min(rgba8.len());
        self.arena[offset..offset + n].copy_from_slice(&rgba8[..n]);

        let header = &mut self.headers[id];
        header.offset = offset;
        header.capacity = capacity;
        header.width = width;
        header.height = height;
        header.wrap_w = width as i32 - 1;
        header.wrap_h = height as i32 - 1;
    }

    #[allow(missing_docs)]
    pub fn set_sampler(&mut self, tile: usize, linear_filter: bool, cms: WrapMode, cmt: WrapMode) {
        if let Some(header) = self.current_mut(tile) {
            header.linear_filter = linear_filter;
            header.sample = SAMPLERS[cms.index()][cmt.index()];
        }
    }

    fn current_mut(&mut self, tile: usize) -> Option<&mut TextureHeader> {
        let id = (*self.current.get(tile)?)?;
        self.headers.get_mut(id)
    }

    /// The texture bound to `tile`.
    pub fn current(&self, tile: usize) -> Option<&TextureHeader> {
        let id = (*self.current.get(tile)?)?;
        self.headers.get(id)
    }

    /// Samples integer texel coordinates on `tile`. Unbound tiles sample transparent black.
    pub fn sample_texel(&self, tile: usize, x: i32, y: i32) -> Rgba32 {
        match self.current(tile) {
            Some(tex) => (tex.sample)(tex, &self.arena, x, y),
            None => Rgba32::default(),
        }
    }

    /// Samples normalized coordinates on `tile`.
    pub fn sample(&self, tile: usize, u: Fix64, v: Fix64) -> Rgba32 {
        match self.current(tile) {
            Some(tex) => (tex.sample)(
                tex,
                &self.arena,
                u.scale(tex.width as i32).to_int(),
                v.scale(tex.height as i32).to_int(),
            ),
            None => Rgba32::default(),
        }
    }

    /// Bytes used by texel data.
    pub fn arena_len(&self) -> usize {
        self.arena.len()
    }
}
