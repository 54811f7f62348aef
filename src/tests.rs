#[cfg(test)]
mod tests {
    use std::fs;

    use crate::config::{PrepConfig, UnknownProtocolPolicy};
    use crate::metadata::{DeviceMetadata, MaliciousRule, NormalMetadata};
    use crate::ports::{PortHierarchy, PortRange};
    use crate::record::TrafficRecord;
    use crate::transform::{select_columns, FeatureTransformer};
    use crate::vocab::LabelTaxonomy;
    use crate::{pipeline, Labeller};

    fn normal_metadata() -> NormalMetadata {
        let mut normal = NormalMetadata::new();
        normal.insert(
            "smart-plug".to_string(),
            DeviceMetadata {
                device_ip: vec!["10.0.0.5".to_string()],
                server_ip: vec!["8.8.8.8".to_string()],
                label: "Benign".to_string(),
            },
        );
        normal
    }

    fn tcp_scan_rule() -> MaliciousRule {
        serde_json::from_str(
            r#"{"source_ip": "10.0.0.x", "destination_ip": "1.2.3.x", "protocol": "6", "label": "TCP Scan"}"#,
        )
        .unwrap()
    }

    fn packet(src: &str, dst: &str, stack: &str) -> TrafficRecord {
        let mut r = TrafficRecord::between(src, dst);
        r.frame_time = Some("Mar 14, 2023 09:26:53.589793000 GMT".to_string());
        r.frame_len = Some(74.0);
        r.frame_protocols = Some(stack.to_string());
        r.ip_flags = Some("0x02".to_string());
        r.ip_ttl = Some(64.0);
        r.ip_checksum = Some("0xb1e6".to_string());
        if stack.ends_with("tcp") {
            r.ip_proto = Some(6);
            r.tcp_srcport = Some(51000);
            r.tcp_dstport = Some(443);
            r.tcp_flags = Some("0x0002".to_string());
            r.tcp_window_size_value = Some(64240.0);
        } else if stack.ends_with("udp") {
            r.ip_proto = Some(17);
            r.udp_srcport = Some(5353);
            r.udp_dstport = Some(53);
        } else {
            r.ip_proto = Some(1);
        }
        r
    }

    fn transformer() -> FeatureTransformer {
        FeatureTransformer::new(
            PortHierarchy::iot_default(),
            LabelTaxonomy::iot_default(),
            UnknownProtocolPolicy::Drop,
        )
    }

    #[test]
    fn test_end_to_end_labelling() {
        let labeller = Labeller::new(normal_metadata(), vec![tcp_scan_rule()], false).unwrap();

        let benign = packet("10.0.0.5", "8.8.8.8", "eth:ethertype:ip:tcp");
        let attack = packet("10.0.0.5", "1.2.3.4", "eth:ethertype:ip:tcp");
        let unrelated = packet("10.0.0.5", "9.9.9.9", "eth:ethertype:ip:tcp");
        let labelled = labeller
            .label_data("smart-plug-1.csv", vec![benign, attack, unrelated])
            .unwrap();
        let labels: Vec<&str> = labelled.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["Benign", "TCP Scan", "Unknown"]);

        let (rows, report) = transformer().transform(&labelled).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(report.unlabelled, 1);
        assert_eq!(rows[1].label_category, "Network Scanning");
    }

    #[test]
    fn test_signature_matches_other_hosts_in_the_subnet() {
        // the device filter runs before labelling; the rule pass itself
        // matches any host covered by the wildcard
        let labeller = Labeller::new(normal_metadata(), vec![tcp_scan_rule()], false).unwrap();
        let mut records = vec![packet("10.0.0.9", "1.2.3.4", "eth:ip:tcp")];
        labeller.label_malicious_traffic(&mut records);
        assert_eq!(records[0].label, "TCP Scan");
    }

    #[test]
    fn test_normal_label_beats_matching_signature() {
        let rules = vec![MaliciousRule::new("10.0.0.x", "8.8.x.x", "UDP Scan")];
        let labeller = Labeller::new(normal_metadata(), rules, false).unwrap();
        let labelled = labeller
            .label_data("smart-plug-1.csv", vec![packet("10.0.0.5", "8.8.8.8", "eth:ip:udp")])
            .unwrap();
        assert_eq!(labelled[0].label, "Benign");
    }

    #[test]
    fn test_earlier_rule_keeps_its_label() {
        let rules = vec![
            MaliciousRule::new("10.0.0.x", "x.x", "Mirai UDP Flooding"),
            tcp_scan_rule(),
        ];
        let labeller = Labeller::new(normal_metadata(), rules, false).unwrap();
        let labelled = labeller
            .label_data("smart-plug-1.csv", vec![packet("10.0.0.5", "1.2.3.4", "eth:ip:tcp")])
            .unwrap();
        assert_eq!(labelled[0].label, "Mirai UDP Flooding");
    }

    #[test]
    fn test_protocol_derivation_by_stack() {
        let mut records = vec![
            packet("10.0.0.5", "8.8.8.8", "eth:ethertype:ip:tcp"),
            packet("10.0.0.5", "8.8.8.8", "eth:ethertype:ip:udp"),
            packet("10.0.0.5", "8.8.8.8", "eth:ethertype:ip:icmp"),
        ];
        for r in records.iter_mut() {
            r.label = "Benign".to_string();
        }
        let (rows, _) = transformer().transform(&records).unwrap();
        assert_eq!(rows[0].ip_protocol, "TCP");
        assert_eq!((rows[0].src_port.as_str(), rows[0].dst_port.as_str()), ("dynamic", "https"));
        assert_eq!(rows[1].ip_protocol, "UDP");
        assert_eq!((rows[1].src_port.as_str(), rows[1].dst_port.as_str()), ("mdns", "dns"));
        assert_eq!(rows[2].ip_protocol, "ICMP");
        assert_eq!((rows[2].src_port.as_str(), rows[2].dst_port.as_str()), ("", ""));
        assert_eq!(rows[0].timestamp, 1_678_786_013);

        assert_eq!(select_columns(rows.clone()), rows);
    }

    #[test]
    fn test_two_range_hierarchy() {
        let hierarchy = PortHierarchy::new(vec![
            PortRange::new(0, 1024, "well-known"),
            PortRange::new(1024, 49152, "registered"),
        ]);
        assert_eq!(hierarchy.categorize(80), "well-known");
        assert_eq!(hierarchy.categorize(443), "well-known");
    }

    fn merged_file(rows: usize, device_ip: &str) -> String {
        let mut text = String::from(
            "frame.time,frame.len,frame.protocols,ip.src,ip.dst,ip.proto,ip.flags,ip.ttl,ip.checksum,tcp.srcport,tcp.dstport,tcp.flags,tcp.window_size_value,label\n",
        );
        for i in 0..rows {
            let label = if i % 4 == 0 { "TCP Scan" } else { "Benign" };
            text.push_str(&format!(
                "\"Mar 14, 2023 09:26:{:02}.000000000 GMT\",{},eth:ethertype:ip:tcp,{},8.8.8.8,6,0x02,64,0x{:04x},{},443,0x0012,{},{}\n",
                i % 60,
                60 + i,
                device_ip,
                i,
                40000 + i,
                500 + i % 7,
                label
            ));
        }
        text
    }

    #[test]
    fn test_preprocess_writes_consistent_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let ready = dir.path().join("ready");
        fs::create_dir_all(&ready).unwrap();
        fs::write(ready.join("smart-plug-1.csv"), merged_file(40, "10.0.0.5")).unwrap();
        fs::write(ready.join("camera-1.csv"), merged_file(60, "10.0.0.7")).unwrap();
        fs::write(ready.join("broken-1.csv"), "frame.time,label\nnot a time,Benign\n").unwrap();

        let out = dir.path().join("final");
        let config = PrepConfig {
            chunk_size: 7,
            threads: 2,
            ..Default::default()
        };
        let summary = pipeline::preprocess_directory(&ready, &out, &config).unwrap();
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.written.len(), 20);

        for device in ["smart-plug-1", "camera-1"] {
            for split in ["train", "val", "test"] {
                for kind in ["features", "labels", "labels_grouped"] {
                    assert!(out.join(format!("{}_{}_{}.csv", device, split, kind)).exists());
                }
            }
        }
        let header = |device: &str| {
            let text = fs::read_to_string(out.join(format!("{}_train_features.csv", device))).unwrap();
            text.lines().next().unwrap().to_string()
        };
        assert_eq!(header("smart-plug-1"), header("camera-1"));

        let train_rows = fs::read_to_string(out.join("smart-plug-1_train_labels.csv"))
            .unwrap()
            .lines()
            .count()
            - 1;
        assert_eq!(train_rows, 24);
    }

    #[test]
    fn test_failed_device_leaves_no_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let ready = dir.path().join("ready");
        fs::create_dir_all(&ready).unwrap();
        fs::write(ready.join("smart-plug-1.csv"), merged_file(40, "10.0.0.5")).unwrap();

        // encoder state cannot be written over a directory
        let out = dir.path().join("final");
        fs::create_dir_all(out.join("smart-plug-1_encoder.json")).unwrap();

        let summary = pipeline::preprocess_directory(&ready, &out, &PrepConfig::default()).unwrap();
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.written.is_empty());
        let leftovers: Vec<_> = fs::read_dir(&out)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "csv"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
