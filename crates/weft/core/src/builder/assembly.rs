// Weft
// Copyright (C) 2025 Weft contributors

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use crate::builder::type_builder::TypeBuilder;
use crate::errors::{BakeError, ImageError, SynthesisError};
use crate::runtime::instruction::BakedBody;
use crate::runtime::registry::{
    FieldDef, MethodBody, MethodDef, NativeFn, RuntimeType, TypeRegistry,
};
use crate::types::{MemberKind, TypeAttributes, TypeDesc};
use crate::verify::verify_body;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const IMAGE_MAGIC: &[u8; 4] = b"WEFT";
const IMAGE_VERSION: u8 = 1;

/// Supplies native implementations for named hook slots at install time.
///
/// A slot the binder does not recognize stays unbound; invoking it is a
/// runtime error.
pub trait HookBinder {
    fn bind(&self, slot: &str) -> Option<NativeFn>;
}

/// Binder that leaves every slot unbound.
pub struct NoHooks;

impl HookBinder for NoHooks {
    fn bind(&self, _slot: &str) -> Option<NativeFn> {
        None
    }
}

/// Collects type builders and bakes them into the registry in one step.
///
/// Finalizing verifies every lowered body first; nothing is installed if any
/// member fails, so a failed bake leaves the registry untouched.
pub struct AssemblyBuilder {
    name: String,
    registry: Arc<TypeRegistry>,
    types: Vec<TypeBuilder>,
}

impl AssemblyBuilder {
    pub fn new(name: impl Into<String>, registry: Arc<TypeRegistry>) -> Self {
        AssemblyBuilder {
            name: name.into(),
            registry,
            types: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Begin a new type. The base, when named, must already be installed in
    /// the registry.
    pub fn create_type(
        &self,
        name: impl Into<String>,
        base: Option<&str>,
        attributes: TypeAttributes,
    ) -> Result<TypeBuilder, SynthesisError> {
        let name = name.into();
        let base = match base {
            Some(b) => Some(
                self.registry
                    .get_by_name(b)
                    .ok_or_else(|| SynthesisError::UnknownType(b.to_string()))?,
            ),
            None => None,
        };
        let id = self.registry.reserve(&name)?;
        Ok(TypeBuilder::new(name, id, base, attributes, self.registry.clone()))
    }

    /// Accept a completed type into the assembly.
    pub fn finish_type(&mut self, ty: TypeBuilder) {
        self.types.push(ty);
    }

    /// Bake with no hook bindings.
    pub fn finalize(self) -> Result<BakedAssembly, BakeError> {
        self.finalize_with(&NoHooks)
    }

    /// Lower, verify and install every collected type, producing the live
    /// types and a relinkable image.
    pub fn finalize_with(self, binder: &dyn HookBinder) -> Result<BakedAssembly, BakeError> {
        let mut baked = Vec::with_capacity(self.types.len());
        for ty in self.types {
            baked.push(ty.bake()?);
        }

        for parts in &baked {
            for method in &parts.methods {
                if let MethodBody::Bytecode(body) = &method.body {
                    verify_body(&format!("{}::{}", parts.name, method.name), body)?;
                }
            }
        }

        let image = AssemblyImage {
            name: self.name.clone(),
            types: baked
                .iter()
                .map(|parts| ImageType {
                    name: parts.name.clone(),
                    sealed: parts.sealed,
                    base: parts
                        .base
                        .and_then(|b| self.registry.get(b))
                        .map(|b| b.name.clone()),
                    interfaces: parts.interfaces.clone(),
                    fields: parts
                        .fields
                        .iter()
                        .map(|f| ImageField {
                            name: f.name.clone(),
                            ty: f.ty.clone(),
                        })
                        .collect(),
                    methods: parts.methods.iter().map(ImageMethod::from_def).collect(),
                })
                .collect(),
        };

        let mut installed = Vec::with_capacity(baked.len());
        for parts in baked {
            let methods = parts
                .methods
                .into_iter()
                .map(|m| bind_slots(m, binder))
                .collect();
            let ty = self.registry.install(
                parts.id,
                parts.name,
                parts.sealed,
                parts.base,
                parts.interfaces,
                parts.fields,
                methods,
            )?;
            debug!(target: "weft::bake", ty = %ty.name, "installed");
            installed.push(ty);
        }
        info!(target: "weft::bake", assembly = %self.name, types = installed.len(), "baked");

        Ok(BakedAssembly {
            name: self.name,
            types: installed,
            image,
        })
    }
}

/// Replace hook-slot bodies with the binder's native implementations.
fn bind_slots(mut def: MethodDef, binder: &dyn HookBinder) -> MethodDef {
    if let MethodBody::HookSlot(slot) = &def.body {
        if let Some(f) = binder.bind(slot) {
            def.body = MethodBody::Native(f);
        }
    }
    def
}

/// A finalized assembly: the installed types plus their persistable image.
pub struct BakedAssembly {
    pub name: String,
    pub types: Vec<Arc<RuntimeType>>,
    pub image: AssemblyImage,
}

/// Serializable method body. Native bodies are recorded as slots named after
/// the method so a reload can rebind them.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum ImageBody {
    Bytecode(BakedBody),
    Slot(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImageMethod {
    name: String,
    kind: MemberKind,
    params: Vec<TypeDesc>,
    return_type: TypeDesc,
    is_virtual: bool,
    is_final: bool,
    body: ImageBody,
}

impl ImageMethod {
    fn from_def(def: &MethodDef) -> Self {
        let body = match &def.body {
            MethodBody::Bytecode(b) => ImageBody::Bytecode(b.clone()),
            MethodBody::HookSlot(slot) => ImageBody::Slot(slot.clone()),
            MethodBody::Native(_) => ImageBody::Slot(def.name.clone()),
        };
        ImageMethod {
            name: def.name.clone(),
            kind: def.kind.clone(),
            params: def.params.clone(),
            return_type: def.return_type.clone(),
            is_virtual: def.is_virtual,
            is_final: def.is_final,
            body,
        }
    }

    fn to_def(&self, binder: &dyn HookBinder) -> MethodDef {
        let body = match &self.body {
            ImageBody::Bytecode(b) => MethodBody::Bytecode(b.clone()),
            ImageBody::Slot(slot) => match binder.bind(slot) {
                Some(f) => MethodBody::Native(f),
                None => MethodBody::HookSlot(slot.clone()),
            },
        };
        MethodDef {
            name: self.name.clone(),
            kind: self.kind.clone(),
            params: self.params.clone(),
            return_type: self.return_type.clone(),
            is_virtual: self.is_virtual,
            is_final: self.is_final,
            body,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImageField {
    name: String,
    ty: TypeDesc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImageType {
    name: String,
    sealed: bool,
    /// Base type by registry name; it must be installed before this image.
    base: Option<String>,
    interfaces: Vec<String>,
    fields: Vec<ImageField>,
    methods: Vec<ImageMethod>,
}

/// On-disk representation of a baked assembly.
///
/// Instruction streams reference types by name, so an image written by one
/// process relinks cleanly against a fresh registry in another as long as
/// the named external types are installed first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyImage {
    pub name: String,
    types: Vec<ImageType>,
}

impl AssemblyImage {
    /// Names of the types carried by this image, in install order.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.iter().map(|t| t.name.as_str())
    }

    pub fn save(&self, path: &Path) -> Result<(), ImageError> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(IMAGE_MAGIC);
        bytes.push(IMAGE_VERSION);
        bytes.extend(bincode::serde::encode_to_vec(self, bincode::config::standard())?);
        std::fs::write(path, bytes)?;
        info!(target: "weft::image", assembly = %self.name, path = %path.display(), "saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ImageError> {
        let bytes = std::fs::read(path)?;
        if bytes.len() < 5 || &bytes[..4] != IMAGE_MAGIC {
            return Err(ImageError::InvalidMagic);
        }
        if bytes[4] != IMAGE_VERSION {
            return Err(ImageError::UnsupportedVersion(bytes[4]));
        }
        let (image, _) =
            bincode::serde::decode_from_slice(&bytes[5..], bincode::config::standard())?;
        Ok(image)
    }

    /// Relink this image against `registry`, binding hook slots through
    /// `binder`. External base types must already be installed.
    pub fn install(
        &self,
        registry: &Arc<TypeRegistry>,
        binder: &dyn HookBinder,
    ) -> Result<Vec<Arc<RuntimeType>>, SynthesisError> {
        let mut installed = Vec::with_capacity(self.types.len());
        for ty in &self.types {
            let base = match &ty.base {
                Some(name) => Some(
                    registry
                        .get_by_name(name)
                        .ok_or_else(|| SynthesisError::UnknownType(name.clone()))?
                        .id,
                ),
                None => None,
            };
            let id = registry.reserve(&ty.name)?;
            let methods = ty.methods.iter().map(|m| m.to_def(binder)).collect();
            let fields = ty
                .fields
                .iter()
                .map(|f| FieldDef {
                    name: f.name.clone(),
                    ty: f.ty.clone(),
                })
                .collect();
            installed.push(registry.install(
                id,
                ty.name.clone(),
                ty.sealed,
                base,
                ty.interfaces.clone(),
                fields,
                methods,
            )?);
        }
        info!(target: "weft::image", assembly = %self.name, types = installed.len(), "relinked");
        Ok(installed)
    }
}
