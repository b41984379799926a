pub mod bundle;
pub mod c_ast;
mod emit;
mod error;
mod gen;
mod stdlib;

#[cfg(test)]
mod tests;

pub use c_ast::CUnit;
pub use emit::emit;
pub use error::CodegenError;
pub use gen::generate;

use plume_ast::names::NameGen;
use plume_typeck::TypedProgram;

/// Generate and render in one step.
pub fn compile_to_c(program: &TypedProgram, names: &mut NameGen) -> Result<String, CodegenError> {
    let unit = generate(program, names)?;
    Ok(emit(&unit))
}
