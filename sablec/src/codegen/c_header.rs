//! C header emission for exported functions.
//!
//! Every externally-linked function definition gets a prototype spelled in
//! C-compatible types, wrapped in an `EXPORT`/`EXTERN_C` macro pair that
//! expands differently on Windows and ELF platforms.

use std::fs::File;
use std::io::Write;

use crate::diagnostics::{BackendError, Diagnostic, ErrorCode};
use crate::ice;
use crate::ir::{Type, TypeKind};
use crate::span::Span;
use crate::target::CIntKind;

use super::CodeGen;

/// Which standard headers the emitted signatures pulled in.
#[derive(Default)]
struct HeaderFlags {
    want_stdint: bool,
    want_stdbool: bool,
}

impl<'ctx, 'a> CodeGen<'ctx, 'a> {
    /// Spell a type the way a C header would.
    fn get_c_type(
        &self,
        ty: &Type,
        flags: &mut HeaderFlags,
        span: Span,
    ) -> Result<String, Vec<Diagnostic>> {
        if let TypeKind::TypeDecl { name, canonical } = ty.kind() {
            for kind in CIntKind::ALL {
                if name == kind.type_name() {
                    return Ok(kind.c_name().to_string());
                }
            }
            if name == "isize" {
                flags.want_stdint = true;
                return Ok("intptr_t".to_string());
            }
            if name == "usize" {
                flags.want_stdint = true;
                return Ok("uintptr_t".to_string());
            }
            if name == "c_void" {
                return Ok("void".to_string());
            }
            return self.get_c_type(canonical, flags, span);
        }

        match ty.kind() {
            TypeKind::Void => Ok("void".to_string()),
            TypeKind::Bool => {
                flags.want_stdbool = true;
                Ok("bool".to_string())
            }
            TypeKind::Unreachable => Ok("__attribute__((__noreturn__)) void".to_string()),
            TypeKind::Float { bits } => match *bits {
                32 => Ok("float".to_string()),
                64 => Ok("double".to_string()),
                80 => Ok("long double".to_string()),
                _ => Err(vec![ice!(span, "float width {} in exported signature", bits)]),
            },
            TypeKind::Int { bits, signed } => {
                flags.want_stdint = true;
                Ok(format!("{}int{}_t", if *signed { "" } else { "u" }, bits))
            }
            TypeKind::Pointer { child, is_const } => {
                let child_c = self.get_c_type(child, flags, span)?;
                let const_str = if *is_const { "const " } else { "" };
                Ok(format!("{}{} *", const_str, child_c))
            }
            TypeKind::Optional { child } => {
                if child.is_pointer_or_fn() {
                    self.get_c_type(child, flags, span)
                } else {
                    Err(vec![ice!(
                        span,
                        "non-pointer optional `{}` in exported signature",
                        self.program.types.type_name(ty)
                    )])
                }
            }
            TypeKind::Array { .. }
            | TypeKind::Struct(_)
            | TypeKind::ErrorUnion { .. }
            | TypeKind::PureError
            | TypeKind::Enum(_)
            | TypeKind::Fn(_) => Err(vec![Diagnostic::error(
                format!(
                    "type `{}` has no C representation in exported signatures",
                    self.program.types.type_name(ty)
                ),
                span,
            )
            .with_error_code(ErrorCode::UnsupportedConstruct)]),
            _ => Err(vec![ice!(
                span,
                "compile-time type `{}` in exported signature",
                self.program.types.type_name(ty)
            )]),
        }
    }

    /// Write the header body to any sink. Split from file handling so
    /// tests can capture the output.
    pub fn write_c_header<W: Write>(&mut self, out: &mut W) -> Result<(), Vec<Diagnostic>> {
        let io_err = |e: std::io::Error| {
            vec![Diagnostic::error(
                format!("unable to write header: {}", e),
                Span::dummy(),
            )
            .with_error_code(ErrorCode::HeaderEmission)]
        };

        let export_macro = format!("{}_EXPORT", self.program.root_out_name).to_uppercase();
        let extern_c_macro = format!("{}_EXTERN_C", self.program.root_out_name).to_uppercase();

        let mut flags = HeaderFlags::default();
        let mut h_buf = String::new();
        for decl in &self.program.fns {
            if decl.internal_linkage || decl.body.is_none() {
                continue;
            }
            let sig = match decl.fn_type.fn_sig() {
                Some(sig) => sig.clone(),
                None => {
                    return Err(vec![ice!(
                        decl.span,
                        "function `{}` has a non-fn type",
                        decl.symbol_name
                    )])
                }
            };

            let return_type_c = self.get_c_type(&sig.ret, &mut flags, decl.span)?;
            h_buf.push_str(&format!(
                "{} {} {}(",
                export_macro, return_type_c, decl.symbol_name
            ));

            if sig.params.is_empty() {
                h_buf.push_str("void)");
            } else {
                for (param_i, param) in sig.params.iter().enumerate() {
                    let comma_str = if param_i == 0 { "" } else { ", " };
                    let restrict_str = if param.is_noalias { "restrict" } else { "" };
                    let param_type_c = self.get_c_type(&param.ty, &mut flags, decl.span)?;
                    let param_name = decl
                        .param_names
                        .get(param_i)
                        .cloned()
                        .unwrap_or_else(|| format!("arg{}", param_i));
                    h_buf.push_str(&format!(
                        "{}{}{} {}",
                        comma_str, param_type_c, restrict_str, param_name
                    ));
                }
                h_buf.push(')');
            }
            h_buf.push_str(";\n");
        }

        let ifdef_dance_name = format!(
            "{}_{}_H",
            self.program.root_out_name, self.program.root_out_name
        )
        .to_uppercase();

        writeln!(out, "#ifndef {}", ifdef_dance_name).map_err(io_err)?;
        writeln!(out, "#define {}\n", ifdef_dance_name).map_err(io_err)?;

        if flags.want_stdbool {
            writeln!(out, "#include <stdbool.h>").map_err(io_err)?;
        }
        if flags.want_stdint {
            writeln!(out, "#include <stdint.h>").map_err(io_err)?;
        }

        writeln!(out).map_err(io_err)?;
        writeln!(out, "#ifdef __cplusplus").map_err(io_err)?;
        writeln!(out, "#define {} extern \"C\"", extern_c_macro).map_err(io_err)?;
        writeln!(out, "#else").map_err(io_err)?;
        writeln!(out, "#define {}", extern_c_macro).map_err(io_err)?;
        writeln!(out, "#endif").map_err(io_err)?;
        writeln!(out).map_err(io_err)?;
        writeln!(out, "#if defined(_WIN32)").map_err(io_err)?;
        writeln!(
            out,
            "#define {} {} __declspec(dllimport)",
            export_macro, extern_c_macro
        )
        .map_err(io_err)?;
        writeln!(out, "#else").map_err(io_err)?;
        writeln!(
            out,
            "#define {} {} __attribute__((visibility (\"default\")))",
            export_macro, extern_c_macro
        )
        .map_err(io_err)?;
        writeln!(out, "#endif").map_err(io_err)?;
        writeln!(out).map_err(io_err)?;

        write!(out, "{}", h_buf).map_err(io_err)?;
        writeln!(out, "\n#endif").map_err(io_err)?;
        Ok(())
    }

    /// Write `<root_out_name>.h` next to the other outputs. Failure to
    /// open or close the file is fatal.
    pub fn generate_c_header(&mut self) -> Result<(), Vec<Diagnostic>> {
        if self.opts.is_test_build {
            return Err(vec![ice!(
                Span::dummy(),
                "header emission requested in a test build"
            )]);
        }
        let path = format!("{}.h", self.program.root_out_name);
        let mut file = File::create(&path).map_err(|e| {
            Vec::from([Diagnostic::from(BackendError::HeaderIo {
                path: path.clone(),
                source: e,
            })])
        })?;
        self.write_c_header(&mut file)?;
        file.sync_all().map_err(|e| {
            Vec::from([Diagnostic::from(BackendError::HeaderIo {
                path: path.clone(),
                source: e,
            })])
        })?;
        Ok(())
    }
}
