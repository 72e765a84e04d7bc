//! The whole-program class and member table.
//!
//! [AppInfo] answers the questions the IR layer needs from the rest of the application: method
//! and field resolution (walking superclass chains), subtype tests and reference-type joins for
//! verification types, and member accessibility for inlining constraints. It is constructed once
//! by the class-file/DEX readers and is immutable afterwards, making it safe to share across
//! compilation worker threads.

use crate::factory::{FieldId, ItemFactory, MethodId, TypeId};
use bitflags::bitflags;
use std::collections::HashMap;

bitflags! {
    /// Java/DEX member and class access flags. Only the bits the IR layer consults are named.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct AccessFlags: u32 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
    }
}

impl AccessFlags {
    pub fn is_package_private(&self) -> bool {
        !self.intersects(Self::PUBLIC | Self::PRIVATE | Self::PROTECTED)
    }
}

#[derive(Debug)]
pub struct MethodDef {
    pub method: MethodId,
    pub access: AccessFlags,
}

#[derive(Debug)]
pub struct FieldDef {
    pub field: FieldId,
    pub access: AccessFlags,
}

#[derive(Debug)]
pub struct ClassDef {
    pub ty: TypeId,
    pub access: AccessFlags,
    /// `None` only for `java/lang/Object` (and types we have no definition for).
    pub superclass: Option<TypeId>,
    pub interfaces: Vec<TypeId>,
    pub methods: Vec<MethodDef>,
    pub fields: Vec<FieldDef>,
}

/// How visible a piece of code is from a call site, and hence under what condition an inlining
/// pass may move it there. Ordered from most to least restrictive so that the strictest of
/// several constraints is simply their [Ord::min].
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Constraint {
    /// Never inlineable from this context.
    Never,
    /// Inlineable into contexts in the same package.
    Package,
    /// Inlineable into contexts in the same class.
    SameClass,
    /// Inlineable anywhere.
    Always,
}

impl Constraint {
    /// The constraint under which a member with `access` declared on `holder` may be used from
    /// `context`.
    pub fn for_member(access: AccessFlags, holder: TypeId, context: TypeId) -> Constraint {
        if access.contains(AccessFlags::PUBLIC) {
            Constraint::Always
        } else if access.contains(AccessFlags::PRIVATE) {
            if holder == context {
                Constraint::Always
            } else {
                Constraint::SameClass
            }
        } else {
            // Protected and package-private both require the caller to stay in the package.
            Constraint::Package
        }
    }
}

#[derive(Debug)]
pub struct AppInfo {
    classes: HashMap<TypeId, ClassDef>,
}

impl AppInfo {
    pub fn new(classes: Vec<ClassDef>) -> Self {
        Self {
            classes: classes.into_iter().map(|c| (c.ty, c)).collect(),
        }
    }

    pub fn definition_for(&self, ty: TypeId) -> Option<&ClassDef> {
        self.classes.get(&ty)
    }

    /// Resolve `method` starting at its holder and walking up the superclass chain. Returns the
    /// defining class and definition, or `None` for references into classes we have no
    /// definition for (library references).
    pub fn resolve_method(&self, factory: &ItemFactory, method: MethodId) -> Option<(&ClassDef, &MethodDef)> {
        let mref = factory.method(method);
        let mut holder = Some(mref.holder);
        while let Some(ty) = holder {
            let class = self.classes.get(&ty)?;
            if let Some(def) = class.methods.iter().find(|d| {
                let cand = factory.method(d.method);
                cand.name == mref.name && cand.proto == mref.proto
            }) {
                return Some((class, def));
            }
            holder = class.superclass;
        }
        None
    }

    pub fn resolve_field(&self, factory: &ItemFactory, field: FieldId) -> Option<(&ClassDef, &FieldDef)> {
        let fref = factory.field(field);
        let mut holder = Some(fref.holder);
        while let Some(ty) = holder {
            let class = self.classes.get(&ty)?;
            if let Some(def) = class.fields.iter().find(|d| {
                let cand = factory.field(d.field);
                cand.name == fref.name && cand.ty == fref.ty
            }) {
                return Some((class, def));
            }
            holder = class.superclass;
        }
        None
    }

    /// All concrete definitions a virtual/interface dispatch of `method` could land on: the
    /// resolved definition plus every override in a subclass of the resolved holder.
    pub fn lookup_dispatch_targets<'a>(
        &'a self,
        factory: &ItemFactory,
        method: MethodId,
    ) -> Vec<(&'a ClassDef, &'a MethodDef)> {
        let mut targets = Vec::new();
        let Some((resolved_class, resolved)) = self.resolve_method(factory, method) else {
            return targets;
        };
        let mref = factory.method(resolved.method);
        targets.push((resolved_class, resolved));
        for class in self.classes.values() {
            if class.ty != resolved_class.ty && self.is_subtype(class.ty, resolved_class.ty) {
                if let Some(def) = class.methods.iter().find(|d| {
                    let cand = factory.method(d.method);
                    cand.name == mref.name && cand.proto == mref.proto
                }) {
                    targets.push((class, def));
                }
            }
        }
        targets
    }

    /// Is `a` a subtype of `b` (reflexively)? Types without definitions are only subtypes of
    /// themselves.
    pub fn is_subtype(&self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }
        let Some(class) = self.classes.get(&a) else {
            return false;
        };
        if class.interfaces.iter().any(|i| self.is_subtype(*i, b)) {
            return true;
        }
        match class.superclass {
            Some(sup) => self.is_subtype(sup, b),
            None => false,
        }
    }

    /// The most specific common supertype of `a` and `b`, falling back to `java/lang/Object`.
    /// This is the join rule verification types use; interfaces do not participate (as in the
    /// verifier, which joins interface types to their common class supertype).
    pub fn join_types(&self, factory: &ItemFactory, a: TypeId, b: TypeId) -> TypeId {
        if a == b {
            return a;
        }
        let mut cand = Some(a);
        while let Some(ty) = cand {
            if self.is_subtype(b, ty) {
                return ty;
            }
            cand = self.classes.get(&ty).and_then(|c| c.superclass);
        }
        factory.known.object
    }

    /// The package-visibility refinement of `constraint`: a [Constraint::Package] answer becomes
    /// [Constraint::Never] when `context` is not in `holder`'s package — the access is illegal
    /// there, so no inlining decision can make it legal.
    pub fn refine_package_constraint(
        &self,
        factory: &ItemFactory,
        constraint: Constraint,
        holder: TypeId,
        context: TypeId,
    ) -> Constraint {
        match constraint {
            Constraint::Package if factory.package_of(holder) != factory.package_of(context) => {
                Constraint::Never
            }
            c => c,
        }
    }
}
