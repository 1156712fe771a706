//! Rule files through decode and build against the load-balancer pipeline.

use p4lb_pipeline::{
    load_rule_batch_file, ActionParam, EntryBuilder, FieldMatchValue, Namespace, PipelineError,
    PipelineProfile, PipelineSchema,
};
use pretty_assertions::assert_eq;
use std::path::PathBuf;

fn demo_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../demos")
}

fn schema() -> PipelineSchema {
    PipelineSchema::from_file(demo_dir().join("build/load_balance.p4info.json")).unwrap()
}

#[test]
fn test_every_demo_rule_builds() {
    let schema = schema();
    let builder = EntryBuilder::new(&schema);
    for device in ["s1", "s2", "s3", "s4", "stor1", "stor2"] {
        let batch = load_rule_batch_file(demo_dir().join(format!("rules/{}-runtime.json", device)))
            .unwrap();
        assert_eq!(batch.target.as_deref(), Some("bmv2"));
        for record in batch.decode_each() {
            let record = record.unwrap();
            builder
                .build(&record)
                .unwrap_or_else(|e| panic!("{} rule #{}: {}", device, record.index, e));
        }
    }
}

#[test]
fn test_s1_entries_encode_to_field_widths() {
    let schema = schema();
    let batch = load_rule_batch_file(demo_dir().join("rules/s1-runtime.json")).unwrap();
    let entries: Vec<_> = batch
        .decode_each()
        .into_iter()
        .map(|r| p4lb_pipeline::build(&r.unwrap(), &schema).unwrap())
        .collect();
    assert_eq!(entries.len(), 5);

    let default = &entries[0];
    assert!(default.is_default);
    assert!(default.match_key.is_empty());
    assert_eq!(default.priority, None);
    assert_eq!(default.action_id.as_raw(), 16805608);

    assert_eq!(
        entries[1].match_key[0].value,
        FieldMatchValue::Lpm {
            value: vec![10, 0, 0, 1],
            prefix_len: 32,
        }
    );
    let params: Vec<Vec<u8>> = entries[1].action_params.iter().map(|p| p.value.clone()).collect();
    assert_eq!(params, vec![vec![0, 0], vec![0, 2]]);

    let nhop = &entries[2];
    assert_eq!(nhop.match_key[0].value, FieldMatchValue::Exact { value: vec![0, 0] });
    let ids: Vec<u32> = nhop.action_params.iter().map(|p| p.param_id.as_raw()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(
        nhop.action_params.iter().map(|p: &ActionParam| p.value.len()).collect::<Vec<_>>(),
        vec![6, 4, 2]
    );

    let acl = &entries[4];
    assert_eq!(acl.priority, Some(10));
    assert_eq!(
        acl.match_key[0].value,
        FieldMatchValue::Ternary {
            value: vec![10, 0, 9, 0],
            mask: vec![255, 255, 255, 0],
        }
    );
    assert_eq!(
        acl.match_key[1].value,
        FieldMatchValue::Range {
            low: vec![0, 0],
            high: vec![3, 255],
        }
    );
}

#[test]
fn test_rule_file_errors() {
    let dir = tempfile::tempdir().unwrap();

    let missing = load_rule_batch_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(missing, PipelineError::BatchFile { .. }));

    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ \"table_entries\": ").unwrap();
    assert!(matches!(
        load_rule_batch_file(&path),
        Err(PipelineError::BatchFile { .. })
    ));

    let path = dir.path().join("mixed.json");
    std::fs::write(
        &path,
        r#"{"table_entries": [
            {"table": "MyIngress.ecmp_nhop", "match": {"meta.ecmp_select": 1},
             "action_name": "MyIngress.set_nhop",
             "action_params": {"nhop_dmac": "00:00:00:00:01:03", "nhop_ipv4": "10.0.3.3", "port": 3}},
            {"table": "MyIngress.nat", "action_name": "MyIngress.drop"},
            {"match": {}}
        ]}"#,
    )
    .unwrap();
    let schema = schema();
    let builder = EntryBuilder::new(&schema);
    let results: Vec<_> = load_rule_batch_file(&path)
        .unwrap()
        .decode_each()
        .into_iter()
        .map(|r| r.and_then(|rule| builder.build(&rule)))
        .collect();
    assert!(results[0].is_ok());
    assert!(matches!(
        results[1],
        Err(PipelineError::UnknownName {
            namespace: Namespace::Table,
            ..
        })
    ));
    assert!(matches!(
        results[2],
        Err(PipelineError::MalformedRule { index: 2, .. })
    ));
}

#[test]
fn test_profile_keeps_descriptor_bytes() {
    let build = demo_dir().join("build");
    let profile = PipelineProfile::load(
        "lb_sw",
        build.join("load_balance.p4info.json"),
        build.join("load_balance_sw.json"),
    )
    .unwrap();
    let on_disk = std::fs::read(build.join("load_balance.p4info.json")).unwrap();
    assert_eq!(profile.schema_blob, on_disk);
    assert!(!profile.artifact.is_empty());
    assert_eq!(profile.schema.tables().count(), 3);
}

#[test]
fn test_built_values_decode_back_to_rule_literals() {
    use p4lb_pipeline::value::{decode_uint, format_mac};
    use std::net::Ipv4Addr;

    let schema = schema();
    let batch = load_rule_batch_file(demo_dir().join("rules/stor1-runtime.json")).unwrap();
    let records: Vec<_> = batch.decode_each().into_iter().map(Result::unwrap).collect();

    let group = EntryBuilder::new(&schema).build(&records[1]).unwrap();
    match &group.match_key[0].value {
        FieldMatchValue::Lpm { value, prefix_len } => {
            let octets: [u8; 4] = value.as_slice().try_into().unwrap();
            assert_eq!(Ipv4Addr::from(octets), Ipv4Addr::new(10, 0, 1, 0));
            assert_eq!(*prefix_len, 24);
        }
        other => panic!("expected LPM, got {:?}", other),
    }

    let nhop = EntryBuilder::new(&schema).build(&records[3]).unwrap();
    assert_eq!(nhop.match_key[0].value, FieldMatchValue::Exact { value: vec![0, 1] });
    assert_eq!(
        format_mac(&nhop.action_params[0].value).as_deref(),
        Some("00:00:00:00:02:02")
    );
    assert_eq!(decode_uint(&nhop.action_params[2].value), Some(2));
}
