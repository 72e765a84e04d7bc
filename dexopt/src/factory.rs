//! Interned descriptors.
//!
//! Strings, type descriptors, field references, and method references are interned into an
//! [ItemFactory] and referenced everywhere else by plain index handles ([StringId], [TypeId],
//! [FieldId], [MethodId]). Interning guarantees that a given descriptor maps to exactly one
//! handle, so equality is a simple integer comparison.
//!
//! The factory is built single-threaded while method bodies are being decoded and is then shared
//! read-only (behind an `Arc`) by all compilation worker threads. Nothing in this module takes a
//! lock.
//!
//! Type descriptors use the JVM grammar: `V Z B S C I J F D`, `L<binary-name>;` and `[<desc>`.

use crate::ir::types::{MemberType, ValueType};
use smallvec::SmallVec;
use std::collections::HashMap;

index_vec::define_index_type! {
    pub struct StringId = u32;
}

index_vec::define_index_type! {
    pub struct TypeId = u32;
}

index_vec::define_index_type! {
    pub struct FieldId = u32;
}

index_vec::define_index_type! {
    pub struct MethodId = u32;
}

/// An interned type. `elem` is the element type for array types and `None` otherwise.
#[derive(Debug)]
pub struct DexType {
    pub descriptor: StringId,
    pub elem: Option<TypeId>,
}

/// A method prototype: return type (which may be the `V` type) and parameter types.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Proto {
    pub ret: TypeId,
    pub params: SmallVec<[TypeId; 4]>,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct DexField {
    pub holder: TypeId,
    pub ty: TypeId,
    pub name: StringId,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct DexMethod {
    pub holder: TypeId,
    pub proto: Proto,
    pub name: StringId,
}

/// Handles for types that the compiler refers to directly.
#[derive(Debug)]
pub struct KnownTypes {
    pub void: TypeId,
    pub object: TypeId,
    pub string: TypeId,
    pub class: TypeId,
    pub throwable: TypeId,
}

#[derive(Debug)]
pub struct ItemFactory {
    strings: index_vec::IndexVec<StringId, String>,
    string_map: HashMap<String, StringId>,
    types: index_vec::IndexVec<TypeId, DexType>,
    type_map: HashMap<StringId, TypeId>,
    fields: index_vec::IndexVec<FieldId, DexField>,
    field_map: HashMap<DexField, FieldId>,
    methods: index_vec::IndexVec<MethodId, DexMethod>,
    method_map: HashMap<DexMethod, MethodId>,
    pub known: KnownTypes,
}

impl ItemFactory {
    pub fn new() -> Self {
        let mut f = Self {
            strings: index_vec::IndexVec::new(),
            string_map: HashMap::new(),
            types: index_vec::IndexVec::new(),
            type_map: HashMap::new(),
            fields: index_vec::IndexVec::new(),
            field_map: HashMap::new(),
            methods: index_vec::IndexVec::new(),
            method_map: HashMap::new(),
            known: KnownTypes {
                void: TypeId::from_usize(0),
                object: TypeId::from_usize(0),
                string: TypeId::from_usize(0),
                class: TypeId::from_usize(0),
                throwable: TypeId::from_usize(0),
            },
        };
        f.known = KnownTypes {
            void: f.intern_type("V"),
            object: f.intern_type("Ljava/lang/Object;"),
            string: f.intern_type("Ljava/lang/String;"),
            class: f.intern_type("Ljava/lang/Class;"),
            throwable: f.intern_type("Ljava/lang/Throwable;"),
        };
        f
    }

    pub fn intern_string(&mut self, s: &str) -> StringId {
        if let Some(id) = self.string_map.get(s) {
            return *id;
        }
        let id = self.strings.push(s.to_owned());
        self.string_map.insert(s.to_owned(), id);
        id
    }

    /// Intern the type with descriptor `desc`. For array types the element type is interned too.
    ///
    /// # Panics
    ///
    /// If `desc` is not a well-formed type descriptor.
    pub fn intern_type(&mut self, desc: &str) -> TypeId {
        assert!(
            matches!(
                desc.as_bytes().first(),
                Some(b'V' | b'Z' | b'B' | b'S' | b'C' | b'I' | b'J' | b'F' | b'D' | b'L' | b'[')
            ),
            "malformed type descriptor '{desc}'"
        );
        let sid = self.intern_string(desc);
        if let Some(id) = self.type_map.get(&sid) {
            return *id;
        }
        let elem = desc.strip_prefix('[').map(|e| self.intern_type(e));
        // `intern_type` above may have grown `self.strings`, but `sid` remains stable.
        let id = self.types.push(DexType {
            descriptor: sid,
            elem,
        });
        self.type_map.insert(sid, id);
        id
    }

    pub fn intern_field(&mut self, holder: &str, ty: &str, name: &str) -> FieldId {
        let field = DexField {
            holder: self.intern_type(holder),
            ty: self.intern_type(ty),
            name: self.intern_string(name),
        };
        if let Some(id) = self.field_map.get(&field) {
            return *id;
        }
        let id = self.fields.push(field.clone());
        self.field_map.insert(field, id);
        id
    }

    pub fn intern_method(&mut self, holder: &str, name: &str, ret: &str, params: &[&str]) -> MethodId {
        let method = DexMethod {
            holder: self.intern_type(holder),
            proto: Proto {
                ret: self.intern_type(ret),
                params: params.iter().map(|p| self.intern_type(p)).collect(),
            },
            name: self.intern_string(name),
        };
        if let Some(id) = self.method_map.get(&method) {
            return *id;
        }
        let id = self.methods.push(method.clone());
        self.method_map.insert(method, id);
        id
    }

    pub fn string(&self, id: StringId) -> &str {
        &self.strings[id]
    }

    pub fn ty(&self, id: TypeId) -> &DexType {
        &self.types[id]
    }

    pub fn field(&self, id: FieldId) -> &DexField {
        &self.fields[id]
    }

    pub fn method(&self, id: MethodId) -> &DexMethod {
        &self.methods[id]
    }

    pub fn descriptor(&self, id: TypeId) -> &str {
        self.string(self.types[id].descriptor)
    }

    pub fn is_primitive(&self, id: TypeId) -> bool {
        !matches!(self.descriptor(id).as_bytes()[0], b'L' | b'[')
    }

    pub fn is_array(&self, id: TypeId) -> bool {
        self.types[id].elem.is_some()
    }

    /// The [ValueType] a value of type `id` has, or `None` for the void type.
    pub fn value_type_of(&self, id: TypeId) -> Option<ValueType> {
        match self.descriptor(id).as_bytes()[0] {
            b'V' => None,
            b'Z' | b'B' | b'S' | b'C' | b'I' => Some(ValueType::Int),
            b'J' => Some(ValueType::Long),
            b'F' => Some(ValueType::Float),
            b'D' => Some(ValueType::Double),
            b'L' | b'[' => Some(ValueType::Object),
            _ => unreachable!(),
        }
    }

    /// The [MemberType] used when type `id` is accessed as a field or array element.
    pub fn member_type_of(&self, id: TypeId) -> MemberType {
        match self.descriptor(id).as_bytes()[0] {
            b'Z' => MemberType::Boolean,
            b'B' => MemberType::Byte,
            b'C' => MemberType::Char,
            b'S' => MemberType::Short,
            b'I' => MemberType::Int,
            b'F' => MemberType::Float,
            b'J' => MemberType::Long,
            b'D' => MemberType::Double,
            b'L' | b'[' => MemberType::Object,
            b'V' => panic!("void has no member type"),
            _ => unreachable!(),
        }
    }

    /// The package part of a class type's binary name (e.g. `com/foo` for `Lcom/foo/Bar;`).
    /// Primitive and array types live in the empty package.
    pub fn package_of(&self, id: TypeId) -> &str {
        let desc = self.descriptor(id);
        if !desc.starts_with('L') {
            return "";
        }
        match desc.rfind('/') {
            Some(i) => &desc[1..i],
            None => "",
        }
    }

    /// Render a method reference in SMALI-style `Lholder;->name(params)ret` form, for
    /// diagnostics and IR printing.
    pub fn method_to_string(&self, id: MethodId) -> String {
        let m = &self.methods[id];
        let params = m
            .proto
            .params
            .iter()
            .map(|p| self.descriptor(*p))
            .collect::<Vec<_>>()
            .join("");
        format!(
            "{}->{}({}){}",
            self.descriptor(m.holder),
            self.string(m.name),
            params,
            self.descriptor(m.proto.ret)
        )
    }

    pub fn field_to_string(&self, id: FieldId) -> String {
        let f = &self.fields[id];
        format!(
            "{}->{}:{}",
            self.descriptor(f.holder),
            self.string(f.name),
            self.descriptor(f.ty)
        )
    }
}

impl Default for ItemFactory {
    fn default() -> Self {
        Self::new()
    }
}
