//! Display list decoding.
//!
//! [decode_command] turns one [RawCommand] into a [GfxCommand] for the selected
//! [MicrocodeVersion]. Texture rectangles span three raw commands, so it returns a
//! [DecodeResult] that may need [DecodeResult::next] before it is complete.
//!
//! Opcodes that are not recognized decode to [GfxCommand::Unknown] rather than failing.

#![allow(missing_docs)]

use std::fmt;

use crate::cmd::*;

/// A raw display list command: two big endian 32 bit words.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RawCommand {
    pub w0: u32,
    pub w1: u32,
}

impl RawCommand {
    pub const fn new(w0: u32, w1: u32) -> Self {
        Self { w0, w1 }
    }

    pub fn opcode(self) -> u8 {
        (self.w0 >> 24) as u8
    }
}

impl fmt::Debug for RawCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RawCommand {{ w0: {:#010X}, w1: {:#010X} }}",
            self.w0, self.w1
        )
    }
}

/// The result of decoding a raw command.
///
/// Most raw commands map to one output command. Texture rectangles need the `w1` words
/// of the two following commands, which are passed to [DecodeResult::next].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeResult {
    Complete(GfxCommand),
    TextureRectangle1 {
        flip: bool,
        rect: Rectangle<u32>,
        tile: TileIndex,
    },
    TextureRectangle2 {
        flip: bool,
        rect: Rectangle<u32>,
        tile: TileIndex,
        s: i16,
        t: i16,
    },
}

impl DecodeResult {
    /// Returns true if the command is fully decoded.
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Complete(_))
    }

    /// Returns the decoded command if it is complete.
    pub fn complete(self) -> Option<GfxCommand> {
        match self {
            Self::Complete(command) => Some(command),
            _ => None,
        }
    }

    /// Continues decoding a partial command with the following raw command.
    ///
    /// Only `w1` of the continuation is used. Calling this on a complete result returns it
    /// unchanged.
    pub fn next(self, cmd_cont: RawCommand) -> Self {
        let w1 = cmd_cont.w1;
        match self {
            Self::Complete(_) => self,
            Self::TextureRectangle1 { flip, rect, tile } => Self::TextureRectangle2 {
                flip,
                rect,
                tile,
                s: (w1 >> 16) as i16,
                t: w1 as i16,
            },
            Self::TextureRectangle2 {
                flip,
                rect,
                tile,
                s,
                t,
            } => {
                let tex_rect = TextureRectangle {
                    rect,
                    tile,
                    s,
                    t,
                    dsdx: (w1 >> 16) as i16,
                    dtdy: w1 as i16,
                };
                Self::Complete(if flip {
                    GfxCommand::DPTextureRectangleFlip(tex_rect)
                } else {
                    GfxCommand::DPTextureRectangle(tex_rect)
                })
            }
        }
    }
}

/// Extracts `width` bits of `w` starting at bit `pos`.
fn bits(w: u32, pos: u32, width: u32) -> u32 {
    (w >> pos) & ((1 << width) - 1)
}

/// Decodes a raw command using the wire layout of `version`.
pub fn decode_command(version: MicrocodeVersion, raw_command: RawCommand) -> DecodeResult {
    let sp = match version {
        MicrocodeVersion::F3d | MicrocodeVersion::F3dex => decode_f3d_sp(version, raw_command),
        MicrocodeVersion::F3dex2 => decode_f3dex2_sp(raw_command),
    };
    match sp {
        Some(cmd) => DecodeResult::Complete(cmd),
        None => decode_dp(raw_command),
    }
}

fn decode_f3d_sp(version: MicrocodeVersion, raw_command: RawCommand) -> Option<GfxCommand> {
    use GfxCommand::*;

    let ex = version == MicrocodeVersion::F3dex;
    let RawCommand { w0, w1 } = raw_command;

    Some(match raw_command.opcode() {
        0x00 => NoOp,
        0x01 => SPMatrix {
            matrix: w1,
            params: MatrixParams::from_bits_truncate(bits(w0, 16, 8) as u8),
        },
        0x03 => {
            let index = bits(w0, 16, 8);
            match index {
                0x80 => SPViewport(w1),
                0x86..=0x94 if index % 2 == 0 => SPLight {
                    light: w1,
                    index: (index - 0x86) / 2,
                },
                _ => Unknown(raw_command),
            }
        }
        0x04 => {
            if ex {
                let n = bits(w0, 10, 6);
                SPVertex {
                    v: w1,
                    n,
                    v0: bits(w0, 16, 8) / 2,
                }
            } else {
                SPVertex {
                    v: w1,
                    n: bits(w0, 0, 16) / 16,
                    v0: bits(w0, 16, 4),
                }
            }
        }
        0x06 => match bits(w0, 16, 8) {
            0 => SPDisplayList(w1),
            1 => SPBranchList(w1),
            _ => Unknown(raw_command),
        },
        0xBF => {
            let div = if ex { 2 } else { 10 };
            SPOneTriangle([
                bits(w1, 16, 8) / div,
                bits(w1, 8, 8) / div,
                bits(w1, 0, 8) / div,
            ])
        }
        0xB1 if ex => SPTwoTriangles(
            [bits(w0, 16, 8) / 2, bits(w0, 8, 8) / 2, bits(w0, 0, 8) / 2],
            [bits(w1, 16, 8) / 2, bits(w1, 8, 8) / 2, bits(w1, 0, 8) / 2],
        ),
        0xBD => SPPopMatrix(1),
        0xBC => decode_moveword(raw_command, bits(w0, 0, 8), bits(w0, 8, 16), false),
        0xBB => SPTexture {
            sc: (w1 >> 16) as u16,
            tc: w1 as u16,
            level: bits(w0, 11, 3),
            tile: bits(w0, 8, 3),
            on: bits(w0, 0, 8) != 0,
        },
        0xBA => DPSetOtherMode {
            shift: bits(w0, 8, 8) + 32,
            len: bits(w0, 0, 8),
            data: (w1 as u64) << 32,
        },
        0xB9 => DPSetOtherMode {
            shift: bits(w0, 8, 8),
            len: bits(w0, 0, 8),
            data: w1 as u64,
        },
        0xB8 => SPEndDisplayList,
        0xB7 => SPGeometryMode {
            clear: GeometryModes::empty(),
            set: GeometryModes::from_bits_truncate(w1),
        },
        0xB6 => SPGeometryMode {
            clear: GeometryModes::from_bits_truncate(w1),
            set: GeometryModes::empty(),
        },
        // RDPHALF words outside of a texture rectangle
        0xB4 | 0xB3 | 0xB2 => NoOp,
        _ => return None,
    })
}

fn decode_f3dex2_sp(raw_command: RawCommand) -> Option<GfxCommand> {
    use GfxCommand::*;

    let RawCommand { w0, w1 } = raw_command;

    Some(match raw_command.opcode() {
        0x00 => NoOp,
        0x01 => {
            let n = bits(w0, 12, 8);
            SPVertex {
                v: w1,
                n,
                v0: bits(w0, 1, 7).wrapping_sub(n),
            }
        }
        0x05 => SPOneTriangle([
            bits(w0, 16, 8) / 2,
            bits(w0, 8, 8) / 2,
            bits(w0, 0, 8) / 2,
        ]),
        0x06 => SPTwoTriangles(
            [bits(w0, 16, 8) / 2, bits(w0, 8, 8) / 2, bits(w0, 0, 8) / 2],
            [bits(w1, 16, 8) / 2, bits(w1, 8, 8) / 2, bits(w1, 0, 8) / 2],
        ),
        0xDA => {
            // G_MTX_PUSH is inverted in this layout
            let p = bits(w0, 0, 8) ^ 0x01;
            let mut params = MatrixParams::empty();
            params.set(MatrixParams::PUSH, p & 0x01 != 0);
            params.set(MatrixParams::LOAD, p & 0x02 != 0);
            params.set(MatrixParams::PROJECTION, p & 0x04 != 0);
            SPMatrix { matrix: w1, params }
        }
        0xDC => {
            let index = bits(w0, 0, 8);
            let offset = bits(w0, 8, 8) * 8;
            match index {
                8 => SPViewport(w1),
                10 => match (offset / 24).checked_sub(2) {
                    Some(slot) => SPLight {
                        light: w1,
                        index: slot,
                    },
                    // lookat
                    None => NoOp,
                },
                _ => Unknown(raw_command),
            }
        }
        0xDB => decode_moveword(raw_command, bits(w0, 16, 8), bits(w0, 0, 16), true),
        0xD8 => SPPopMatrix(w1 / 64),
        0xD7 => SPTexture {
            sc: (w1 >> 16) as u16,
            tc: w1 as u16,
            level: bits(w0, 11, 3),
            tile: bits(w0, 8, 3),
            on: bits(w0, 1, 7) != 0,
        },
        0xD9 => SPGeometryMode {
            clear: GeometryModes::from_f3dex2(!bits(w0, 0, 24)),
            set: GeometryModes::from_f3dex2(w1),
        },
        0xE2 => {
            let len = bits(w0, 0, 8) + 1;
            DPSetOtherMode {
                shift: 32u32.saturating_sub(bits(w0, 8, 8) + len),
                len,
                data: w1 as u64,
            }
        }
        0xE3 => {
            let len = bits(w0, 0, 8) + 1;
            DPSetOtherMode {
                shift: 64u32.saturating_sub(bits(w0, 8, 8) + len),
                len,
                data: (w1 as u64) << 32,
            }
        }
        0xDE => match bits(w0, 16, 8) {
            0 => SPDisplayList(w1),
            1 => SPBranchList(w1),
            _ => Unknown(raw_command),
        },
        0xDF => SPEndDisplayList,
        0xE1 | 0xF1 => NoOp,
        _ => return None,
    })
}

fn decode_moveword(raw_command: RawCommand, index: u32, offset: u32, ex2: bool) -> GfxCommand {
    use GfxCommand::*;

    let w1 = raw_command.w1;
    match index {
        2 => SPNumLights(if ex2 {
            w1 / 24 + 1
        } else {
            w1.wrapping_sub(0x8000_0000) / 32
        }),
        6 => SPSegment {
            seg: offset / 4,
            base: w1,
        },
        8 => SPFogFactor {
            mul: (w1 >> 16) as i16,
            offset: w1 as i16,
        },
        _ => Unknown(raw_command),
    }
}

fn decode_image(raw_command: RawCommand) -> Option<Image> {
    let w0 = raw_command.w0;
    Some(Image {
        fmt: (bits(w0, 21, 3) as u8).try_into().ok()?,
        size: (bits(w0, 19, 2) as u8).try_into().ok()?,
        width: bits(w0, 0, 12) + 1,
        img: raw_command.w1,
    })
}

fn decode_dp(raw_command: RawCommand) -> DecodeResult {
    use GfxCommand::*;

    let RawCommand { w0, w1 } = raw_command;

    DecodeResult::Complete(match raw_command.opcode() {
        0xFF => match decode_image(raw_command) {
            Some(image) => DPSetColorImage(image),
            None => Unknown(raw_command),
        },
        0xFE => DPSetDepthImage(w1),
        0xFD => match decode_image(raw_command) {
            Some(image) => DPSetTextureImage(image),
            None => Unknown(raw_command),
        },
        0xFC => DPSetCombineMode(CombineMode::from_mux(w0, w1)),
        0xFB => DPSetEnvColor(Rgba32::from_u32(w1)),
        0xFA => DPSetPrimColor(Rgba32::from_u32(w1)),
        0xF9 => DPSetBlendColor(Rgba32::from_u32(w1)),
        0xF8 => DPSetFogColor(Rgba32::from_u32(w1)),
        0xF7 => DPSetFillColor(w1),
        0xF6 => DPFillRectangle(Rectangle {
            ulx: bits(w1, 12, 12),
            uly: bits(w1, 0, 12),
            lrx: bits(w0, 12, 12),
            lry: bits(w0, 0, 12),
        }),
        0xF5 => {
            let (fmt, size) = match (
                ImageFormat::try_from(bits(w0, 21, 3) as u8),
                ComponentSize::try_from(bits(w0, 19, 2) as u8),
            ) {
                (Ok(fmt), Ok(size)) => (fmt, size),
                _ => return DecodeResult::Complete(Unknown(raw_command)),
            };
            DPSetTile(
                TileIndex(bits(w1, 24, 3) as u8),
                TileParams {
                    fmt,
                    size,
                    line: bits(w0, 9, 9),
                    tmem: bits(w0, 0, 9),
                    palette: bits(w1, 20, 4),
                    cmt: (bits(w1, 18, 2) as u8).into(),
                    maskt: bits(w1, 14, 4),
                    shiftt: bits(w1, 10, 4),
                    cms: (bits(w1, 8, 2) as u8).into(),
                    masks: bits(w1, 4, 4),
                    shifts: bits(w1, 0, 4),
                },
            )
        }
        0xF4 => DPLoadTile(TileIndex(bits(w1, 24, 3) as u8), decode_tile_size(w0, w1)),
        0xF3 => DPLoadBlock(
            TileIndex(bits(w1, 24, 3) as u8),
            TextureBlock {
                uls: bits(w0, 12, 12),
                ult: bits(w0, 0, 12),
                lrs: bits(w1, 12, 12),
                dxt: bits(w1, 0, 12),
            },
        ),
        0xF2 => DPSetTileSize(TileIndex(bits(w1, 24, 3) as u8), decode_tile_size(w0, w1)),
        0xF0 => DPLoadTLUTCmd(TileIndex(bits(w1, 24, 3) as u8), bits(w1, 14, 10)),
        0xED => {
            let mode = ScissorMode::try_from(bits(w1, 24, 8) as u8).unwrap_or_default();
            DPSetScissor(
                mode,
                Rectangle {
                    ulx: bits(w0, 12, 12) as u16,
                    uly: bits(w0, 0, 12) as u16,
                    lrx: bits(w1, 12, 12) as u16,
                    lry: bits(w1, 0, 12) as u16,
                },
            )
        }
        0xE9 => DPFullSync,
        0xE8 => DPTileSync,
        0xE7 => DPPipeSync,
        0xE6 => DPLoadSync,
        op @ (0xE4 | 0xE5) => {
            return DecodeResult::TextureRectangle1 {
                flip: op == 0xE5,
                rect: Rectangle {
                    ulx: bits(w1, 12, 12),
                    uly: bits(w1, 0, 12),
                    lrx: bits(w0, 12, 12),
                    lry: bits(w0, 0, 12),
                },
                tile: TileIndex(bits(w1, 24, 3) as u8),
            };
        }
        _ => Unknown(raw_command),
    })
}

fn decode_tile_size(w0: u32, w1: u32) -> TileSize {
    TileSize {
        uls: bits(w0, 12, 12),
        ult: bits(w0, 0, 12),
        lrs: bits(w1, 12, 12),
        lrt: bits(w1, 0, 12),
    }
}
