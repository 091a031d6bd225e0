use std::collections::HashSet;

use kselect::kernels::BUILTIN_TEMPLATES;
use kselect::{default_selectors, KernelKind, PrimitiveDb};

const KINDS: [KernelKind; 10] = [
    KernelKind::Convolution,
    KernelKind::Pooling,
    KernelKind::FullyConnected,
    KernelKind::Eltwise,
    KernelKind::SoftMax,
    KernelKind::Activation,
    KernelKind::Concatenation,
    KernelKind::Lrn,
    KernelKind::Reorder,
    KernelKind::ReorderWeights,
];

#[test]
fn every_kind_has_one_selector() -> anyhow::Result<()> {
    let set = default_selectors()?;
    assert_eq!(set.selectors().len(), KINDS.len());
    for kind in KINDS {
        let selector = set
            .get(kind)
            .unwrap_or_else(|| panic!("no selector for {kind}"));
        assert_eq!(selector.kind(), kind);
        assert!(!selector.variants().is_empty(), "{kind} has no variants");
        for variant in selector.variants() {
            assert_eq!(
                variant.kind(),
                kind,
                "{} registered under {kind}",
                variant.name()
            );
        }
    }
    Ok(())
}

#[test]
fn variant_names_are_unique() -> anyhow::Result<()> {
    let set = default_selectors()?;
    let mut seen = HashSet::new();
    for selector in set.selectors() {
        for name in selector.variant_names() {
            assert!(seen.insert(name), "variant name {name} registered twice");
        }
    }
    Ok(())
}

#[test]
fn builtin_templates_resolve_once() {
    let db = PrimitiveDb::builtin();
    let mut seen = HashSet::new();
    for name in BUILTIN_TEMPLATES {
        assert!(seen.insert(*name), "template {name} listed twice");
        let source = db
            .get_unique(name)
            .unwrap_or_else(|err| panic!("{name}: {err}"));
        assert!(source.contains("KERNEL"), "{name} has no kernel entry");
    }
    assert_eq!(db.len(), BUILTIN_TEMPLATES.len());
}
