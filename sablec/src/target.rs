//! Target description for code generation.
//!
//! The backend does not detect the native target itself; the driver hands it
//! a triple. This module parses that triple far enough to answer the
//! questions codegen actually asks: which OS family are we on, how wide are
//! the C integer types, which object format, and (on Darwin) which
//! deployment target was requested through the environment.

use crate::diagnostics::BackendError;

/// Operating systems the backend distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOs {
    Linux,
    MacOs,
    Ios,
    Windows,
    Freebsd,
    Freestanding,
    Unknown,
}

/// Architectures the backend distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetArch {
    X86_64,
    X86,
    Aarch64,
    Arm,
    Thumb,
    Riscv64,
    Wasm32,
    Unknown,
}

impl TargetArch {
    /// Pointer width in bits.
    pub fn pointer_bits(self) -> u32 {
        match self {
            TargetArch::X86_64 | TargetArch::Aarch64 | TargetArch::Riscv64 => 64,
            TargetArch::X86 | TargetArch::Arm | TargetArch::Thumb | TargetArch::Wasm32 => 32,
            TargetArch::Unknown => 64,
        }
    }
}

/// Object file format implied by the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectFormat {
    Elf,
    MachO,
    Coff,
    Wasm,
}

/// What the compilation is producing. Mirrors the driver's output options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutType {
    Exe,
    Lib,
    Obj,
    Unknown,
}

/// The C integer types whose widths depend on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum CIntKind {
    Short = 0,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
}

impl CIntKind {
    pub const ALL: [CIntKind; 8] = [
        CIntKind::Short,
        CIntKind::UShort,
        CIntKind::Int,
        CIntKind::UInt,
        CIntKind::Long,
        CIntKind::ULong,
        CIntKind::LongLong,
        CIntKind::ULongLong,
    ];

    /// The Sable-side primitive type name.
    pub fn type_name(self) -> &'static str {
        match self {
            CIntKind::Short => "c_short",
            CIntKind::UShort => "c_ushort",
            CIntKind::Int => "c_int",
            CIntKind::UInt => "c_uint",
            CIntKind::Long => "c_long",
            CIntKind::ULong => "c_ulong",
            CIntKind::LongLong => "c_longlong",
            CIntKind::ULongLong => "c_ulonglong",
        }
    }

    /// The C spelling used in generated headers.
    pub fn c_name(self) -> &'static str {
        match self {
            CIntKind::Short => "short",
            CIntKind::UShort => "unsigned short",
            CIntKind::Int => "int",
            CIntKind::UInt => "unsigned int",
            CIntKind::Long => "long",
            CIntKind::ULong => "unsigned long",
            CIntKind::LongLong => "long long",
            CIntKind::ULongLong => "unsigned long long",
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            CIntKind::Short | CIntKind::Int | CIntKind::Long | CIntKind::LongLong
        )
    }
}

/// Darwin deployment target picked up from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentTarget {
    MacOs(String),
    Ios(String),
}

/// A parsed target description.
#[derive(Debug, Clone)]
pub struct TargetInfo {
    /// The full triple, passed through to the backend module verbatim.
    pub triple: String,
    pub arch: TargetArch,
    pub os: TargetOs,
    pub oformat: ObjectFormat,
}

impl TargetInfo {
    /// Parse an `arch-vendor-os[-environ]` triple. Only the fields codegen
    /// consults are extracted; the triple string itself is kept verbatim.
    pub fn from_triple(triple: &str) -> Result<Self, BackendError> {
        let mut parts = triple.split('-');
        let arch_str = parts.next().unwrap_or("");
        let rest: Vec<&str> = parts.collect();

        let arch = match arch_str {
            "x86_64" | "amd64" => TargetArch::X86_64,
            "i386" | "i486" | "i586" | "i686" => TargetArch::X86,
            "aarch64" | "arm64" => TargetArch::Aarch64,
            s if s.starts_with("thumb") => TargetArch::Thumb,
            s if s.starts_with("arm") => TargetArch::Arm,
            "riscv64" => TargetArch::Riscv64,
            "wasm32" => TargetArch::Wasm32,
            "" => {
                return Err(BackendError::InvalidTarget {
                    triple: triple.to_string(),
                })
            }
            _ => TargetArch::Unknown,
        };

        let os_str = rest
            .iter()
            .find(|p| {
                !matches!(
                    **p,
                    "unknown" | "pc" | "apple" | "none" | "gnu" | "musl" | "msvc" | "eabi"
                        | "eabihf" | "android" | "gnueabihf"
                )
            })
            .copied()
            .unwrap_or("unknown");

        let os = if os_str.starts_with("linux") {
            TargetOs::Linux
        } else if os_str.starts_with("darwin") || os_str.starts_with("macos") {
            TargetOs::MacOs
        } else if os_str.starts_with("ios") {
            TargetOs::Ios
        } else if os_str.starts_with("windows") || os_str.starts_with("win32") {
            TargetOs::Windows
        } else if os_str.starts_with("freebsd") {
            TargetOs::Freebsd
        } else if os_str == "freestanding" {
            TargetOs::Freestanding
        } else {
            TargetOs::Unknown
        };

        let oformat = match (os, arch) {
            (_, TargetArch::Wasm32) => ObjectFormat::Wasm,
            (TargetOs::MacOs | TargetOs::Ios, _) => ObjectFormat::MachO,
            (TargetOs::Windows, _) => ObjectFormat::Coff,
            _ => ObjectFormat::Elf,
        };

        Ok(Self {
            triple: triple.to_string(),
            arch,
            os,
            oformat,
        })
    }

    /// Whether this is a Darwin-family target.
    pub fn is_darwin(&self) -> bool {
        matches!(self.os, TargetOs::MacOs | TargetOs::Ios)
    }

    /// Pointer width in bits.
    pub fn pointer_bits(&self) -> u32 {
        self.arch.pointer_bits()
    }

    /// Width in bits of a target-dependent C integer type.
    ///
    /// `short` is 16 and `int` is 32 everywhere we target; `long` follows
    /// the pointer except on Windows (LLP64); `long long` is always 64.
    pub fn c_int_bits(&self, kind: CIntKind) -> u32 {
        match kind {
            CIntKind::Short | CIntKind::UShort => 16,
            CIntKind::Int | CIntKind::UInt => 32,
            CIntKind::Long | CIntKind::ULong => {
                if self.os == TargetOs::Windows {
                    32
                } else {
                    self.pointer_bits()
                }
            }
            CIntKind::LongLong | CIntKind::ULongLong => 64,
        }
    }

    /// Read the Darwin deployment target from the environment
    /// (`MACOSX_DEPLOYMENT_TARGET` / `IPHONEOS_DEPLOYMENT_TARGET`).
    pub fn deployment_target(&self) -> Option<DeploymentTarget> {
        if !self.is_darwin() {
            return None;
        }
        self.arbitrate_deployment_target(
            std::env::var("MACOSX_DEPLOYMENT_TARGET").ok(),
            std::env::var("IPHONEOS_DEPLOYMENT_TARGET").ok(),
        )
    }

    /// Pick the deployment target from the two requested versions.
    ///
    /// Both may be set at once; the architecture arbitrates: ARM-family
    /// targets take the iOS setting, everything else takes macOS.
    pub fn arbitrate_deployment_target(
        &self,
        mut osx_target: Option<String>,
        mut ios_target: Option<String>,
    ) -> Option<DeploymentTarget> {
        if !self.is_darwin() {
            return None;
        }

        if osx_target.is_some() && ios_target.is_some() {
            let is_arm = matches!(
                self.arch,
                TargetArch::Arm | TargetArch::Aarch64 | TargetArch::Thumb
            );
            if is_arm {
                osx_target = None;
            } else {
                ios_target = None;
            }
        }

        if let Some(v) = osx_target {
            Some(DeploymentTarget::MacOs(v))
        } else {
            ios_target.map(DeploymentTarget::Ios)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_linux_triple() {
        let t = TargetInfo::from_triple("x86_64-unknown-linux-gnu").unwrap();
        assert_eq!(t.arch, TargetArch::X86_64);
        assert_eq!(t.os, TargetOs::Linux);
        assert_eq!(t.oformat, ObjectFormat::Elf);
        assert_eq!(t.pointer_bits(), 64);
    }

    #[test]
    fn test_parse_darwin_triple() {
        let t = TargetInfo::from_triple("aarch64-apple-darwin").unwrap();
        assert_eq!(t.os, TargetOs::MacOs);
        assert_eq!(t.oformat, ObjectFormat::MachO);
        assert!(t.is_darwin());
    }

    #[test]
    fn test_c_int_widths() {
        let linux = TargetInfo::from_triple("x86_64-unknown-linux-gnu").unwrap();
        assert_eq!(linux.c_int_bits(CIntKind::Short), 16);
        assert_eq!(linux.c_int_bits(CIntKind::Int), 32);
        assert_eq!(linux.c_int_bits(CIntKind::Long), 64);
        assert_eq!(linux.c_int_bits(CIntKind::LongLong), 64);

        let windows = TargetInfo::from_triple("x86_64-pc-windows-msvc").unwrap();
        assert_eq!(windows.c_int_bits(CIntKind::Long), 32);

        let arm = TargetInfo::from_triple("armv7-unknown-linux-gnueabihf").unwrap();
        assert_eq!(arm.c_int_bits(CIntKind::Long), 32);
    }

    #[test]
    fn test_deployment_target_arbitration() {
        let both = || (Some("10.13".to_string()), Some("11.0".to_string()));

        // Both versions requested: Intel takes macOS, ARM takes iOS.
        let x86 = TargetInfo::from_triple("x86_64-apple-darwin").unwrap();
        let (osx, ios) = both();
        assert_eq!(
            x86.arbitrate_deployment_target(osx, ios),
            Some(DeploymentTarget::MacOs("10.13".to_string()))
        );

        let arm = TargetInfo::from_triple("aarch64-apple-ios").unwrap();
        let (osx, ios) = both();
        assert_eq!(
            arm.arbitrate_deployment_target(osx, ios),
            Some(DeploymentTarget::Ios("11.0".to_string()))
        );

        // A single setting wins regardless of architecture.
        assert_eq!(
            x86.arbitrate_deployment_target(None, Some("11.0".to_string())),
            Some(DeploymentTarget::Ios("11.0".to_string()))
        );

        // Non-Darwin targets never consult the versions.
        let linux = TargetInfo::from_triple("x86_64-unknown-linux-gnu").unwrap();
        let (osx, ios) = both();
        assert_eq!(linux.arbitrate_deployment_target(osx, ios), None);
        assert_eq!(linux.deployment_target(), None);
    }
}
