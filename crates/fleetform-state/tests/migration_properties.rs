//! Property-based tests for checkpoint migrations
//!
//! These tests verify:
//! - Downgrade(Upgrade(s)) == s for every adjacent version pair
//! - V1 -> V3 -> V1 through the migrator is the identity
//! - migrations never reorder or drop resources, and keep stack/config
//! - encoded checkpoints decode to the same value

use chrono::{DateTime, Utc};
use fleetform_resource::{PropertyMap, PropertyValue, Urn};
use fleetform_state::migrate::{
    downgrade_v2_to_v1, downgrade_v3_to_v2, upgrade_v1_to_v2, upgrade_v2_to_v3,
};
use fleetform_state::versions::{
    CheckpointV1, CheckpointV2, CheckpointV3, ManifestV1, ManifestV2, PluginInfoV2,
    ProviderReferenceV2, ResourceV1, ResourceV2, StatusV2, StatusV3,
};
use fleetform_state::{
    ConfigMap, ConfigValue, Migrator, VersionedCheckpoint, decode_checkpoint, encode_checkpoint,
};
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

fn time_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_000_000_000).prop_map(|secs| DateTime::from_timestamp(secs, 0).unwrap_or_default())
}

fn value_strategy() -> impl Strategy<Value = PropertyValue> {
    let leaf = prop_oneof![
        Just(PropertyValue::Null),
        any::<bool>().prop_map(PropertyValue::Bool),
        any::<i32>().prop_map(|n| PropertyValue::Number(n as f64)),
        "[a-z0-9]{0,8}".prop_map(PropertyValue::String),
    ];
    leaf.prop_recursive(2, 8, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..3).prop_map(PropertyValue::Array),
            inner.prop_map(PropertyValue::secret),
        ]
    })
}

fn property_map_strategy() -> impl Strategy<Value = PropertyMap> {
    prop::collection::btree_map("[a-z]{1,6}", value_strategy(), 0..4)
        .prop_map(|entries| entries.into_iter().collect())
}

fn config_strategy() -> impl Strategy<Value = ConfigMap> {
    prop::collection::btree_map(
        "[a-z]{1,6}",
        ("[a-z0-9]{0,8}", any::<bool>()).prop_map(|(value, secret)| ConfigValue { value, secret }),
        0..4,
    )
}

/// Resources named r0..rN, each depending only on earlier ones
fn resources_v1_strategy() -> impl Strategy<Value = Vec<ResourceV1>> {
    prop::collection::vec(
        (
            property_map_strategy(),
            property_map_strategy(),
            any::<bool>(),
            any::<bool>(),
            any::<u8>(),
        ),
        0..5,
    )
    .prop_map(|items| {
        let urns: Vec<Urn> = (0..items.len())
            .map(|i| Urn::parse(format!("stack::proj::test:index:Thing::r{}", i)).unwrap())
            .collect();
        items
            .into_iter()
            .enumerate()
            .map(|(i, (inputs, outputs, protect, delete, mask))| ResourceV1 {
                urn: urns[i].clone(),
                type_token: "test:index:Thing".to_string(),
                id: format!("id-{}", i),
                inputs,
                outputs,
                parent: None,
                dependencies: (0..i)
                    .filter(|j| mask & (1 << (j % 8)) != 0)
                    .map(|j| urns[j].clone())
                    .collect(),
                protect,
                delete,
            })
            .collect()
    })
}

fn checkpoint_v1_strategy() -> impl Strategy<Value = CheckpointV1> {
    (
        "[a-z]{1,8}",
        config_strategy(),
        time_strategy(),
        resources_v1_strategy(),
    )
        .prop_map(|(stack, config, time, resources)| CheckpointV1 {
            stack,
            config,
            manifest: ManifestV1 {
                time,
                version: "0.1.0".to_string(),
            },
            resources,
        })
}

fn status_v2_strategy() -> impl Strategy<Value = StatusV2> {
    prop_oneof![
        Just(StatusV2::Created),
        Just(StatusV2::PendingCreate),
        Just(StatusV2::PendingDelete),
        Just(StatusV2::External),
    ]
}

fn checkpoint_v2_strategy() -> impl Strategy<Value = CheckpointV2> {
    (
        checkpoint_v1_strategy(),
        prop::collection::vec(status_v2_strategy(), 5),
        prop::collection::vec(("[a-z]{1,6}", "[0-9]\\.[0-9]\\.[0-9]"), 0..3),
        any::<bool>(),
    )
        .prop_map(|(v1, statuses, plugins, with_provider)| {
            let mut v2 = upgrade_v1_to_v2(v1);
            v2.manifest.plugins = plugins
                .into_iter()
                .map(|(name, version)| PluginInfoV2 { name, version })
                .collect();
            for (resource, status) in v2.resources.iter_mut().zip(statuses) {
                resource.status = status;
                if with_provider {
                    resource.provider = Some(ProviderReferenceV2 {
                        package: "test".to_string(),
                        config: PropertyMap::new().with("region", "tk1a"),
                    });
                }
            }
            v2
        })
}

fn shared_fields_v2(c: &CheckpointV2) -> Vec<(Urn, String, String, PropertyMap, PropertyMap, Vec<Urn>, bool)> {
    c.resources
        .iter()
        .map(|r: &ResourceV2| {
            (
                r.urn.clone(),
                r.type_token.clone(),
                r.id.clone(),
                r.inputs.clone(),
                r.outputs.clone(),
                r.dependencies.clone(),
                r.protect,
            )
        })
        .collect()
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    /// V1 -> V2 -> V1 is the identity
    #[test]
    fn v1_v2_roundtrip(v1 in checkpoint_v1_strategy()) {
        let back = downgrade_v2_to_v1(upgrade_v1_to_v2(v1.clone()));
        prop_assert_eq!(back, v1);
    }

    /// V2 -> V3 -> V2 is the identity
    #[test]
    fn v2_v3_roundtrip(v2 in checkpoint_v2_strategy()) {
        let back = downgrade_v3_to_v2(upgrade_v2_to_v3(v2.clone()));
        prop_assert_eq!(back, v2);
    }

    /// V1 -> V3 -> V1 through the migrator is the identity
    #[test]
    fn chain_v1_v3_v1(v1 in checkpoint_v1_strategy()) {
        let migrator = Migrator::new();
        let up = migrator.migrate(VersionedCheckpoint::V1(v1.clone()), 3).unwrap();
        prop_assert_eq!(up.version(), 3);
        let down = migrator.migrate(up, 1).unwrap();
        prop_assert_eq!(down, VersionedCheckpoint::V1(v1));
    }

    /// Downgrading V3 then upgrading keeps every field both versions share
    #[test]
    fn v3_downgrade_keeps_shared_fields(v2 in checkpoint_v2_strategy(), indeterminate in any::<bool>()) {
        let mut v3: CheckpointV3 = upgrade_v2_to_v3(v2);
        if indeterminate && let Some(first) = v3.resources.first_mut() {
            first.status = StatusV3::Indeterminate;
        }
        let down = downgrade_v3_to_v2(v3.clone());
        prop_assert_eq!(&down.stack, &v3.stack);
        prop_assert_eq!(&down.config, &v3.config);
        prop_assert_eq!(&down.manifest, &v3.manifest);
        let reupgraded = upgrade_v2_to_v3(down.clone());
        prop_assert_eq!(shared_fields_v2(&down), shared_fields_v2(&downgrade_v3_to_v2(reupgraded)));
    }

    /// Migration never reorders or drops resources
    #[test]
    fn migration_preserves_resources(v2 in checkpoint_v2_strategy(), to in 1u32..=3) {
        let urns: Vec<_> = v2.resources.iter().map(|r| r.urn.clone()).collect();
        let stack = v2.stack.clone();
        let migrated = Migrator::new().migrate(VersionedCheckpoint::V2(v2), to).unwrap();
        prop_assert_eq!(migrated.version(), to);
        prop_assert_eq!(migrated.stack(), stack.as_str());
        let migrated_urns: Vec<_> = match &migrated {
            VersionedCheckpoint::V1(c) => c.resources.iter().map(|r| r.urn.clone()).collect(),
            VersionedCheckpoint::V2(c) => c.resources.iter().map(|r| r.urn.clone()).collect(),
            VersionedCheckpoint::V3(c) => c.resources.iter().map(|r| r.urn.clone()).collect(),
        };
        prop_assert_eq!(migrated_urns, urns);
    }

    /// The on-disk envelope decodes to the checkpoint that was encoded
    #[test]
    fn envelope_roundtrip(v1 in checkpoint_v1_strategy()) {
        let checkpoint = VersionedCheckpoint::V1(v1);
        let text = encode_checkpoint(&checkpoint).unwrap();
        prop_assert_eq!(decode_checkpoint(&text).unwrap(), checkpoint);
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn empty_checkpoint_v1_to_v2_keeps_stack_and_config() {
    let mut config = ConfigMap::new();
    config.insert("foo".to_string(), ConfigValue::plain("42"));
    let v1 = CheckpointV1 {
        stack: "mystack".to_string(),
        config: config.clone(),
        manifest: ManifestV1 {
            time: Utc::now(),
            version: "0.1.0".to_string(),
        },
        resources: Vec::new(),
    };

    let v2 = Migrator::new()
        .migrate(VersionedCheckpoint::V1(v1), 2)
        .unwrap();
    let VersionedCheckpoint::V2(v2) = v2 else {
        panic!("expected a v2 checkpoint");
    };
    assert_eq!(v2.stack, "mystack");
    assert_eq!(v2.config, config);
    assert!(v2.resources.is_empty());
    assert_eq!(
        v2.manifest,
        ManifestV2 {
            time: v2.manifest.time,
            version: "0.1.0".to_string(),
            plugins: Vec::new(),
        }
    );
}
