use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use iot_dataset_prep::config::UnknownProtocolPolicy;
use iot_dataset_prep::metadata::{DeviceMetadata, MaliciousRule, NormalMetadata};
use iot_dataset_prep::{FeatureTransformer, LabelTaxonomy, Labeller, PortHierarchy, TrafficRecord};

fn synthetic_records(n: usize) -> Vec<TrafficRecord> {
    (0..n)
        .map(|i| {
            let peer = match i % 3 {
                0 => "8.8.8.8".to_string(),
                1 => format!("1.2.3.{}", i % 250),
                _ => format!("172.16.{}.{}", i % 200, i % 250),
            };
            let mut r = TrafficRecord::between("10.0.0.5", &peer);
            r.frame_time = Some("Mar 14, 2023 09:26:53.589793000 GMT".to_string());
            r.frame_len = Some(60.0 + (i % 1400) as f64);
            r.frame_protocols = Some("eth:ethertype:ip:tcp".to_string());
            r.ip_proto = Some(6);
            r.ip_flags = Some("0x02".to_string());
            r.ip_ttl = Some(64.0);
            r.ip_checksum = Some("0xb1e6".to_string());
            r.tcp_srcport = Some(40000 + (i % 20000) as u16);
            r.tcp_dstport = Some(443);
            r.tcp_flags = Some("0x0018".to_string());
            r
        })
        .collect()
}

fn labeller() -> Labeller {
    let mut normal = NormalMetadata::new();
    normal.insert(
        "smart-plug".to_string(),
        DeviceMetadata {
            device_ip: vec!["10.0.0.5".to_string()],
            server_ip: vec!["8.8.8.8".to_string()],
            label: "Benign".to_string(),
        },
    );
    let rules = vec![
        MaliciousRule::new("10.0.0.x", "1.2.3.x", "TCP Scan").with_protocol(6),
        MaliciousRule::new("10.0.0.x", "172.16.x.x", "Mirai TCP Flooding"),
    ];
    Labeller::new(normal, rules, false).expect("valid rules")
}

fn bench_pipeline(c: &mut Criterion) {
    let labeller = labeller();
    let transformer = FeatureTransformer::new(
        PortHierarchy::iot_default(),
        LabelTaxonomy::iot_default(),
        UnknownProtocolPolicy::Drop,
    );
    let records = synthetic_records(10_000);

    c.bench_function("label_10k", |b| {
        b.iter_batched(
            || records.clone(),
            |batch| black_box(labeller.label_data("smart-plug-1.csv", batch)),
            BatchSize::LargeInput,
        )
    });

    let labelled = labeller
        .label_data("smart-plug-1.csv", records.clone())
        .expect("known device");
    c.bench_function("transform_10k", |b| {
        b.iter(|| black_box(transformer.transform(&labelled)))
    });
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
