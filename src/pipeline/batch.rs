//! Per-frame mesh draw batching
//!
//! Submissions only record commands; the G-buffer pass replays them grouped
//! by geometry and cull mode so draws sharing state run back to back.

use std::collections::HashMap;

use glam::Mat4;

use crate::backend::{CullMode, TextureHandle};
use crate::resources::{Material, MeshHandle};
use crate::uniforms::MaterialUniform;

/// Default number of draw commands one frame can hold
pub const DEFAULT_MAX_DRAW_COMMANDS: usize = 16384;

/// One mesh draw for the current frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshDrawCommand {
    pub transform: Mat4,
    pub mesh: MeshHandle,
    /// Material scalars; texture flags are resolved when the draw is recorded
    pub material: MaterialUniform,
    /// Enabled material textures in G-buffer slot order
    pub textures: [Option<TextureHandle>; 6],
    pub cull_mode: CullMode,
    /// Written to the picking target, 0 for none
    pub entity_id: u32,
}

impl MeshDrawCommand {
    pub fn new(transform: Mat4, mesh: MeshHandle, material: &Material, cull_mode: CullMode) -> Self {
        let flags = material.textures.flags();
        Self {
            transform,
            mesh,
            material: material.to_uniform(flags),
            textures: material.textures.slots().map(|(_, slot)| slot.active()),
            cull_mode,
            entity_id: 0,
        }
    }

    pub fn with_entity_id(mut self, entity_id: u32) -> Self {
        self.entity_id = entity_id;
        self
    }
}

/// Batch key: draws with the same geometry and cull mode share state
pub type BatchKey = (MeshHandle, CullMode);

/// Commands for one frame, capped at a fixed capacity
#[derive(Debug)]
pub struct GeometryBatch {
    commands: Vec<MeshDrawCommand>,
    groups: HashMap<BatchKey, Vec<usize>>,
    /// Keys in first-submission order
    order: Vec<BatchKey>,
    capacity: usize,
    dropped: usize,
}

impl Default for GeometryBatch {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DRAW_COMMANDS)
    }
}

impl GeometryBatch {
    pub fn new(capacity: usize) -> Self {
        Self {
            commands: Vec::new(),
            groups: HashMap::new(),
            order: Vec::new(),
            capacity,
            dropped: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Commands the batch can hold without reallocating
    pub fn allocated(&self) -> usize {
        self.commands.capacity()
    }

    /// Pre-allocate room for `count` more commands, up to the capacity
    pub fn reserve(&mut self, count: usize) {
        let room = self.capacity.saturating_sub(self.commands.len());
        self.commands.reserve(count.min(room));
    }

    /// Record a draw. Returns false when the batch is full and the command
    /// was dropped; the first drop of a frame is logged.
    pub fn submit(&mut self, command: MeshDrawCommand) -> bool {
        if self.commands.len() >= self.capacity {
            if self.dropped == 0 {
                log::warn!(
                    "Geometry batch is full ({} commands), dropping further draws this frame",
                    self.capacity
                );
            }
            self.dropped += 1;
            return false;
        }

        let key = (command.mesh, command.cull_mode);
        let index = self.commands.len();
        self.commands.push(command);
        self.groups
            .entry(key)
            .or_insert_with(|| {
                self.order.push(key);
                Vec::new()
            })
            .push(index);
        true
    }

    /// Commands in submission order
    pub fn commands(&self) -> &[MeshDrawCommand] {
        &self.commands
    }

    /// Commands grouped by [`BatchKey`]. Groups come in the order their first
    /// command was submitted, commands within a group in submission order.
    pub fn grouped<'a>(
        &'a self,
    ) -> impl Iterator<Item = (BatchKey, impl Iterator<Item = &'a MeshDrawCommand> + 'a)> + 'a {
        self.order.iter().map(move |key| {
            let indices = self.groups.get(key).map_or(&[][..], Vec::as_slice);
            (*key, indices.iter().map(move |&i| &self.commands[i]))
        })
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Commands rejected since the last clear
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Forget every command, keeping allocations
    pub fn clear(&mut self) {
        self.commands.clear();
        self.groups.clear();
        self.order.clear();
        self.dropped = 0;
    }
}
