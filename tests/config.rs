use treeseq_infer::{Config, InferError};

#[test]
fn test_partial_json_uses_defaults() {
    let config: Config =
        serde_json::from_str(r#"{ "recombination_rate": 2.5e-8, "sequence_length": 1000.0 }"#).unwrap();
    assert_eq!(config.recombination_rate, 2.5e-8);
    assert_eq!(config.sequence_length, Some(1000.0));
    assert_eq!(config.error_rate, Config::default().error_rate);
    assert_eq!(config.traceback_block_size, 1024);
    config.validate().unwrap();
}

#[test]
fn test_json_round_trip_and_validation() {
    let config = Config {
        error_rate: 0.02,
        segment_block_size: 64,
        ..Config::default()
    };
    let json = serde_json::to_string_pretty(&config).unwrap();
    let restored: Config = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, config);

    let broken: Config = serde_json::from_str(r#"{ "error_rate": 1.5 }"#).unwrap();
    assert!(matches!(
        broken.validate(),
        Err(InferError::InvalidParameter { .. })
    ));
}
