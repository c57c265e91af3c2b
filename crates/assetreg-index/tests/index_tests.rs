use assetreg_core::{
    AssetIdentifier, AssetRecord, CategoryMask, DependencyCategory, DependencyProperties,
    DependencyQuery,
};
use assetreg_index::{AppendMode, IndexStore, SaveOptions};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use tempfile::TempDir;

fn pkg(name: &str) -> AssetIdentifier {
    AssetIdentifier::package(name)
}

/// A, B and C with A -> B (hard) and B -> C (soft), plus a manage edge.
fn build_store() -> IndexStore {
    let mut store = IndexStore::new();
    for (package, object) in [("/Game/A", "A"), ("/Game/B", "B"), ("/Game/Sub/C", "C")] {
        store.add_path(assetreg_core::parent_path(package).unwrap());
        store.add_asset_data(
            AssetRecord::new(package, object, "Mesh")
                .with_tag("Owner", "art")
                .with_tag("Triangles", 64i64),
        );
        let data = store.create_or_get_package_data(package);
        data.size = 1024;
        data.chunk_ids = vec![1];
    }
    store.set_package_dependencies(
        &pkg("/Game/A"),
        CategoryMask::all(),
        [(
            pkg("/Game/B"),
            DependencyCategory::Content,
            DependencyProperties::HARD | DependencyProperties::GAME,
        )],
    );
    store.set_package_dependencies(
        &pkg("/Game/B"),
        CategoryMask::all(),
        [(pkg("/Game/Sub/C"), DependencyCategory::Content, DependencyProperties::GAME)],
    );
    store.add_dependency(
        &pkg("/Game/A"),
        &pkg("/Game/Sub/C"),
        DependencyCategory::Manage,
        DependencyProperties::DIRECT,
    );
    store
}

#[test]
fn test_hard_soft_scenario() {
    let store = build_store();
    let content = DependencyQuery::category(DependencyCategory::Content);

    let deps_a: Vec<_> = store
        .dependencies(&pkg("/Game/A"), &content)
        .into_iter()
        .map(|(id, _, _)| id)
        .collect();
    assert_eq!(deps_a, vec![pkg("/Game/B")]);

    let hard = content.require(DependencyProperties::HARD);
    assert!(store.dependencies(&pkg("/Game/B"), &hard).is_empty());
    assert_eq!(store.dependencies(&pkg("/Game/B"), &content).len(), 1);

    assert_eq!(store.referencers(&pkg("/Game/Sub/C"), &content), vec![pkg("/Game/B")]);
    assert_eq!(
        store.referencers(&pkg("/Game/Sub/C"), &DependencyQuery::all()),
        vec![pkg("/Game/A"), pkg("/Game/B")]
    );
    assert!(store.graph().is_consistent());
}

#[test]
fn test_snapshot_round_trip_all_options() {
    let store = build_store();
    let temp = TempDir::new().unwrap();

    for include_dependencies in [false, true] {
        for include_package_data in [false, true] {
            let options = SaveOptions {
                include_dependencies,
                include_package_data,
                tag_filter: None,
            };
            let path = temp.path().join(format!(
                "snap_{include_dependencies}_{include_package_data}.bin"
            ));
            store
                .save(BufWriter::new(File::create(&path).unwrap()), &options)
                .unwrap();
            let (loaded, info) =
                IndexStore::load(BufReader::new(File::open(&path).unwrap())).unwrap();

            let mut expected = store.clone();
            if !include_dependencies {
                expected.clear_dependencies();
            }
            if !include_package_data {
                expected.clear_package_data();
            }
            assert_eq!(loaded, expected, "deps={include_dependencies} pkg={include_package_data}");
            assert_eq!(info.has_dependencies, include_dependencies);
            assert_eq!(info.has_package_data, include_package_data);
            assert!(loaded.graph().is_consistent());
        }
    }
}

#[test]
fn test_bidirectional_invariant_under_churn() {
    let mut store = build_store();
    let ids: Vec<_> = (0..20).map(|i| pkg(&format!("/Game/N{i}"))).collect();

    for (i, source) in ids.iter().enumerate() {
        let edges = (1..4).map(|k| {
            (
                ids[(i * 7 + k) % ids.len()].clone(),
                if k % 2 == 0 {
                    DependencyCategory::Content
                } else {
                    DependencyCategory::SearchableName
                },
                DependencyProperties::HARD,
            )
        });
        store.set_package_dependencies(source, CategoryMask::all(), edges);
    }
    assert!(store.graph().is_consistent());

    for source in ids.iter().step_by(3) {
        store.set_package_dependencies(source, CategoryMask::CONTENT, std::iter::empty());
    }
    assert!(store.graph().is_consistent());

    for source in ids.iter().step_by(2) {
        store.remove_package(&source.package);
    }
    assert!(store.graph().is_consistent());
}

#[test]
fn test_remove_package_preserves_referencers() {
    let mut store = build_store();
    let removed = store.remove_package("/Game/B");

    assert_eq!(removed.len(), 1);
    assert!(store.package_data("/Game/B").is_none());

    let content = DependencyQuery::category(DependencyCategory::Content);
    // A still depends on B; B no longer depends on C.
    let deps_a: Vec<_> = store
        .dependencies(&pkg("/Game/A"), &content)
        .into_iter()
        .map(|(id, _, _)| id)
        .collect();
    assert_eq!(deps_a, vec![pkg("/Game/B")]);
    assert!(store.referencers(&pkg("/Game/Sub/C"), &content).is_empty());
    assert!(store.graph().is_consistent());
}

#[test]
fn test_update_keep_removed_tags() {
    let mut store = build_store();
    let id = AssetIdentifier::object("/Game/A", "A");

    let partial = AssetRecord::new("/Game/A", "A", "Mesh").with_tag("Owner", "design");
    assert!(store.update_asset_data(&id, partial.clone(), true));
    let record = store.asset(&id).unwrap();
    assert_eq!(record.tag("Owner").and_then(|v| v.as_str()), Some("design"));
    assert!(record.tag("Triangles").is_some());

    assert!(store.update_asset_data(&id, partial, false));
    assert!(store.asset(&id).unwrap().tag("Triangles").is_none());
}

#[test]
fn test_append_adds_dependencies_of_new_packages() {
    let mut store = IndexStore::new();
    let other = build_store();

    let outcome = store.append(other.clone(), AppendMode::Append);
    assert_eq!(outcome.added.len(), 3);
    assert_eq!(outcome.paths_added.len(), 2);
    assert_eq!(store, other);

    let again = store.append(other, AppendMode::OnlyUpdateNew);
    assert!(again.added.is_empty());
    assert!(again.updated.is_empty());
}
