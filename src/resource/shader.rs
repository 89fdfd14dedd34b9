use smallvec::SmallVec;
use crate::ProgramId;

/// Names of render targets or texture resources declared by a pass.
pub type PassNames = SmallVec<[String; 4]>;

/**
 * One program invocation of a [`Shader`].
 * An empty list of render targets means "the target currently being rendered to".
 */
#[derive(Clone, Debug)]
pub struct ShaderPass {
    pub program: ProgramId,
    pub render_targets: PassNames,
    pub texture_resources: PassNames,
}

impl ShaderPass {

    pub fn new(program: ProgramId) -> Self {
        Self {
            program,
            render_targets: PassNames::new(),
            texture_resources: PassNames::new(),
        }
    }

    pub fn with_render_target(mut self, name: impl Into<String>) -> Self {
        self.render_targets.push(name.into());
        self
    }

    pub fn with_texture_resource(mut self, name: impl Into<String>) -> Self {
        self.texture_resources.push(name.into());
        self
    }
}

/**
 * Multi-pass shader.
 * Groups of draws are ordered by priority, lowest first, within the same transparency class.
 */
#[derive(Clone, Debug)]
pub struct Shader {
    pub name: String,
    pub priority: i32,
    passes: Vec<ShaderPass>,
}

impl Shader {

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            passes: Vec::new(),
        }
    }

    /// Shader with a single pass that draws to the current target.
    pub fn single_pass(name: impl Into<String>, program: ProgramId) -> Self {
        Self::new(name).with_pass(ShaderPass::new(program))
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_pass(mut self, pass: ShaderPass) -> Self {
        self.passes.push(pass);
        self
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn passes(&self) -> &[ShaderPass] {
        &self.passes
    }

    pub fn pass(&self, index: usize) -> Option<&ShaderPass> {
        self.passes.get(index)
    }
}
