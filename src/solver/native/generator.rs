use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use lbmgen_codegen::native::{
    render_py_block, Block, FnQualifier, Function, Item, Module, Type,
};
use lbmgen_ir::{
    validate_boundaries, BoundarySpec, CollisionSpec, ConfigError, EquilibriumSpec,
    StencilDescriptor, StreamingSpec,
};

use super::boundary::{native_boundary, NativeBoundary};
use super::buffers::{BufferName, CodeBuffers};
use super::collision::{native_collision, NativeCollision};
use super::context::GenContext;
use super::equilibrium::{native_equilibrium, NativeEquilibrium};
use super::error::{GenerationError, InstallError, SlotScope, TemplateError};
use super::install::{self, BuildCommand};
use super::primitives::{generate_d, generate_q};
use super::slots::{Slot, SlotTable};
use super::streaming::{native_streaming, NativeStreaming};
use super::template;

/// Assembles one specialised LBM step kernel from a stencil and a set of
/// independently written components.
pub struct Generator {
    stencil: StencilDescriptor,
    equilibrium: Box<dyn NativeEquilibrium>,
    collision: Box<dyn NativeCollision>,
    boundaries: Vec<Box<dyn NativeBoundary>>,
    streaming: Box<dyn NativeStreaming>,
}

impl Generator {
    pub fn new(
        stencil: StencilDescriptor,
        collision: CollisionSpec,
        boundaries: Vec<BoundarySpec>,
        equilibrium: EquilibriumSpec,
        streaming: StreamingSpec,
    ) -> Result<Self, ConfigError> {
        collision.validate()?;
        validate_boundaries(&boundaries)?;
        Ok(Self::with_components(
            stencil,
            native_collision(&collision),
            boundaries.iter().map(native_boundary).collect(),
            native_equilibrium(&equilibrium),
            native_streaming(&streaming),
        ))
    }

    /// Builds a generator from already constructed components, e.g. a custom
    /// variant outside the built-in component families.
    pub fn with_components(
        stencil: StencilDescriptor,
        collision: Box<dyn NativeCollision>,
        boundaries: Vec<Box<dyn NativeBoundary>>,
        equilibrium: Box<dyn NativeEquilibrium>,
        streaming: Box<dyn NativeStreaming>,
    ) -> Self {
        Self {
            stencil,
            equilibrium,
            collision,
            boundaries,
            streaming,
        }
    }

    pub fn stencil(&self) -> &StencilDescriptor {
        &self.stencil
    }

    /// Unique tag of this specialisation, e.g.
    /// `d2q9_quadratic_bgk_bounce_back_1_standard_streaming`.
    pub fn name(&self) -> String {
        let mut parts = vec![
            self.stencil.name().to_lowercase(),
            self.equilibrium.name(),
            self.collision.name(),
        ];
        parts.extend(self.boundaries.iter().map(|boundary| boundary.name()));
        parts.push(self.streaming.name());
        parts.join("_")
    }

    /// Runs every component against a fresh context in dependency order:
    /// stencil primitives, equilibrium, collision, boundaries, streaming.
    pub fn generate_module(&self) -> Result<NativeModule, GenerationError> {
        let collision_masked = self.boundaries.iter().any(|b| b.masks_collision());
        let mut ctx = GenContext::new(
            &self.stencil,
            self.equilibrium.as_ref(),
            self.streaming.is_double_buffered(),
            collision_masked,
        );

        generate_q(&mut ctx)?;
        generate_d(&mut ctx)?;

        self.equilibrium.contribute_kernel_fragments(&mut ctx)?;
        self.equilibrium.contribute_launcher_fragments(&mut ctx)?;
        self.collision.contribute_kernel_fragments(&mut ctx)?;
        self.collision.contribute_launcher_fragments(&mut ctx)?;
        for boundary in &self.boundaries {
            boundary.contribute_kernel_fragments(&mut ctx)?;
            boundary.contribute_launcher_fragments(&mut ctx)?;
        }
        self.streaming.contribute_kernel_fragments(&mut ctx)?;
        self.streaming.contribute_launcher_fragments(&mut ctx)?;

        let (slots, buffers) = ctx.finish();
        Ok(NativeModule {
            name: self.name(),
            d: self.stencil.d(),
            q: self.stencil.q(),
            slots,
            buffers,
        })
    }

    /// Generates and renders every buffer, keyed by placeholder name.
    pub fn generate(&self) -> Result<IndexMap<String, String>, GenerationError> {
        Ok(self.generate_module()?.render())
    }

    /// Fills the templates with `buffers` and writes them into `dir`.
    pub fn format(
        &self,
        buffers: &IndexMap<String, String>,
        dir: impl AsRef<Path>,
    ) -> Result<Vec<PathBuf>, TemplateError> {
        template::format(buffers, dir.as_ref())
    }

    /// Builds the formatted directory with `python -m pip install .`.
    pub fn install(&self, dir: impl AsRef<Path>) -> Result<(), InstallError> {
        self.install_with(dir, &BuildCommand::default())
    }

    pub fn install_with(
        &self,
        dir: impl AsRef<Path>,
        command: &BuildCommand,
    ) -> Result<(), InstallError> {
        install::install(dir.as_ref(), command)
    }
}

/// Structured result of one generation run.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeModule {
    pub name: String,
    pub d: usize,
    pub q: usize,
    pub slots: SlotTable,
    pub buffers: CodeBuffers,
}

impl NativeModule {
    pub fn kernel_name(&self) -> String {
        format!("lettuce_cuda_{}_kernel", self.name)
    }

    pub fn kernel(&self) -> Function {
        Function::new(
            self.kernel_name(),
            vec![FnQualifier::Global],
            Type::Void,
            self.slots.kernel_params(),
            Block::new(self.buffers.kernel_body()),
        )
    }

    /// Self-contained kernel translation unit, used by the host emulator.
    pub fn cuda_module(&self) -> Module {
        let alias = |name: &str, ty: &str| Item::Alias {
            name: name.to_string(),
            ty: Type::Custom(ty.to_string()),
        };
        let mut module = Module::from(vec![
            alias("index_t", "int"),
            alias("byte_t", "unsigned char"),
            alias("scalar_t", "double"),
        ]);
        module.extend(self.buffers.hooks.iter().cloned());
        module.push(Item::Function(self.kernel()));
        module
    }

    pub fn render(&self) -> IndexMap<String, String> {
        let slots = &self.slots;
        let mut out = IndexMap::new();
        for buffer in BufferName::ALL {
            let text = match buffer {
                BufferName::Name => self.name.clone(),
                BufferName::Hooks => Module::from(self.buffers.hooks.clone()).to_cuda(),
                BufferName::KernelParameters => {
                    join_slots(slots, SlotScope::Kernel, |name, slot| format!("{} {name}", slot.ty))
                }
                BufferName::KernelArguments => {
                    join_slots(slots, SlotScope::Kernel, |_, slot| slot.source.clone())
                }
                BufferName::LauncherParameters => {
                    join_slots(slots, SlotScope::Launcher, |name, slot| format!("{} {name}", slot.ty))
                }
                BufferName::LauncherNames => {
                    join_slots(slots, SlotScope::Launcher, |name, _| name.to_string())
                }
                BufferName::LauncherArguments => {
                    join_slots(slots, SlotScope::Launcher, |_, slot| slot.source.clone())
                }
                BufferName::LauncherChecks => slots
                    .iter(SlotScope::Launcher)
                    .filter(|(_, slot)| *slot.ty.unqualified() == Type::Tensor)
                    .map(|(name, _)| format!("    CHECK_INPUT({name});"))
                    .collect::<Vec<_>>()
                    .join("\n"),
                BufferName::Index => Block::new(self.buffers.index.clone()).to_cuda(1),
                BufferName::Node => Block::new(self.buffers.node.clone()).to_cuda(1),
                BufferName::Write => Block::new(self.buffers.write.clone()).to_cuda(1),
                BufferName::PythonPre => render_py_block(&self.buffers.python_pre, 1),
                BufferName::PythonPost => render_py_block(&self.buffers.python_post, 1),
            };
            out.insert(buffer.as_str().to_string(), text);
        }
        out
    }
}

fn join_slots(slots: &SlotTable, scope: SlotScope, part: impl Fn(&str, &Slot) -> String) -> String {
    slots
        .iter(scope)
        .map(|(name, slot)| part(name, slot))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use lbmgen_ir::stencil;

    fn default_generator() -> Generator {
        Generator::new(
            stencil::d2q9(),
            CollisionSpec::Bgk { tau: 0.8 },
            vec![
                BoundarySpec::BounceBack { index: 1 },
                BoundarySpec::BounceBack { index: 2 },
            ],
            EquilibriumSpec::Quadratic,
            StreamingSpec::standard(),
        )
        .unwrap()
    }

    #[test]
    fn name_concatenates_component_tags() {
        assert_eq!(
            default_generator().name(),
            "d2q9_quadratic_bgk_bounce_back_1_bounce_back_2_standard_streaming"
        );
    }

    #[test]
    fn buffers_cover_every_placeholder_in_order() {
        let buffers = default_generator().generate().unwrap();
        let keys: Vec<&str> = buffers.keys().map(String::as_str).collect();
        let expected: Vec<&str> = BufferName::ALL.iter().map(|b| b.as_str()).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn default_kernel_has_expected_signature() {
        let buffers = default_generator().generate().unwrap();
        assert_eq!(
            buffers["kernel_parameters"],
            "const scalar_t* f, const index_t dimension_x, const index_t dimension_y, \
             const scalar_t tau_inv, const byte_t* no_collision_mask, scalar_t* f_next"
        );
        assert_eq!(
            buffers["launcher_parameters"],
            "at::Tensor f, const at::Tensor no_collision_mask, double tau_inv, at::Tensor f_next"
        );
        assert_eq!(
            buffers["launcher_arguments"],
            "simulation.f, simulation.no_collision_mask, 1.0 / simulation.collision.tau, simulation.f_next"
        );
        assert_eq!(
            buffers["python_post"],
            "    simulation.f, simulation.f_next = simulation.f_next, simulation.f\n"
        );
        assert!(buffers["node"].contains("if (node_type == 0) {"));
        assert!(buffers["node"].contains("if (node_type == 2) {"));
    }

    #[test]
    fn every_launcher_tensor_is_checked() {
        let generator = Generator::new(
            stencil::d2q9(),
            CollisionSpec::Bgk { tau: 0.8 },
            vec![BoundarySpec::BounceBack { index: 1 }],
            EquilibriumSpec::Quadratic,
            StreamingSpec::standard_masked(),
        )
        .unwrap();
        let buffers = generator.generate().unwrap();
        assert_eq!(
            buffers["launcher_checks"],
            "    CHECK_INPUT(f);\n    CHECK_INPUT(no_collision_mask);\n    \
             CHECK_INPUT(no_stream_mask);\n    CHECK_INPUT(f_next);"
        );
        assert!(!buffers["launcher_checks"].contains("tau_inv"));
    }

    #[test]
    fn unused_collision_mask_is_not_declared() {
        let generator = Generator::new(
            stencil::d2q9(),
            CollisionSpec::Bgk { tau: 0.8 },
            Vec::new(),
            EquilibriumSpec::Quadratic,
            StreamingSpec::standard(),
        )
        .unwrap();
        let buffers = generator.generate().unwrap();
        assert!(!buffers["kernel_parameters"].contains("no_collision_mask"));
        assert!(!buffers["node"].contains("node_type"));
        assert!(buffers["python_pre"].contains("assert hasattr(simulation, 'f_next')"));
    }
}
