use crate::ast::{Expr, NodeRef, ProcDef, ProcSig, Stmt};
use crate::error::InternalError;
use log::debug;
use std::collections::HashMap;

pub const MIN_FRAME: usize = 32;
pub const FRAME_STRIDE: usize = 16;
/// Saved x29/x30 at the top of the frame.
pub const FRAME_RECORD: usize = 16;
pub const VARIADIC_SLOT: usize = 8;
/// Largest frame reachable by a single `sub sp, sp, #imm`.
pub const MAX_FRAME: usize = 4095;
/// Largest offset `stp`/`ldp` of x registers can encode.
pub const PAIR_OFFSET_MAX: usize = 504;

fn align_up(n: usize, align: usize) -> usize {
    if align == 0 {
        n
    } else {
        (n + align - 1) / align * align
    }
}

/// Extra arguments passed to known variadic callees anywhere in `body`.
pub fn variadic_spill_count(body: &[Stmt], protos: &HashMap<String, ProcSig>) -> usize {
    let mut count = 0;
    for stmt in body {
        NodeRef::from(stmt).walk(&mut |node| {
            if let NodeRef::Expr(Expr::Call(call)) = node {
                if let Some(sig) = protos.get(&call.name).filter(|sig| sig.variadic) {
                    count += call.args.len().saturating_sub(sig.value_params().count());
                }
            }
        });
    }
    count
}

/// Sizes of every stack slot a definition allocates, in allocation order:
/// parameters first, then declarations in tree order.
pub fn slot_sizes(def: &ProcDef) -> Vec<usize> {
    let mut sizes: Vec<usize> = def.sig.value_params().map(|p| p.ty.size()).collect();
    for stmt in &def.body {
        NodeRef::from(stmt).walk(&mut |node| {
            if let NodeRef::VarDecl(decl) = node {
                sizes.push(decl.ty.size());
            }
        });
    }
    sizes
}

/// Bytes below the frame record: naturally aligned slots plus variadic spill
/// space.
pub fn required_bytes(def: &ProcDef, protos: &HashMap<String, ProcSig>) -> usize {
    let locals = slot_sizes(def)
        .into_iter()
        .fold(0, |used, size| align_up(used, size) + size);
    locals + VARIADIC_SLOT * variadic_spill_count(&def.body, protos)
}

/// Rounds up to the stack alignment every `sp` adjustment must keep.
pub fn align_to_stride(bytes: usize) -> usize {
    align_up(bytes, FRAME_STRIDE)
}

pub fn frame_size(required: usize) -> usize {
    let mut size = MIN_FRAME;
    while size - FRAME_RECORD < required {
        size += FRAME_STRIDE;
    }
    size
}

/// Layout of one procedure's frame. Slots are carved downward from just
/// below the frame record; variadic spills sit at the bottom from `sp + 0`.
#[derive(Debug, Clone)]
pub struct Frame {
    pub size: usize,
    pub required: usize,
    cursor: usize,
}

impl Frame {
    pub fn new(def: &ProcDef, protos: &HashMap<String, ProcSig>) -> Result<Frame, InternalError> {
        let required = required_bytes(def, protos);
        let size = frame_size(required);
        debug!(
            "frame for `{}`: {} bytes required, {} allocated",
            def.sig.name, required, size
        );
        if size > MAX_FRAME {
            return Err(InternalError::FrameOverflow(size));
        }
        Ok(Frame {
            size,
            required,
            cursor: size - FRAME_RECORD,
        })
    }

    /// Offset of the saved frame record from `sp`.
    pub fn record_offset(&self) -> usize {
        self.size - FRAME_RECORD
    }

    /// Whether the frame record is addressable directly from `sp` by
    /// `stp`/`ldp`.
    pub fn record_in_reach(&self) -> bool {
        self.record_offset() <= PAIR_OFFSET_MAX
    }

    /// Reserves a naturally aligned slot and returns its offset from `sp`.
    pub fn alloc(&mut self, size: usize) -> Result<usize, InternalError> {
        let lowered = self
            .cursor
            .checked_sub(size)
            .ok_or(InternalError::FrameOverflow(self.size))?;
        self.cursor = if size == 0 { lowered } else { lowered / size * size };
        Ok(self.cursor)
    }
}
