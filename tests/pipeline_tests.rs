use chrono::{DateTime, Utc};
use mule_detection_engine::config::ModelConfig;
use mule_detection_engine::feature_extractor::FEATURE_COUNT;
use mule_detection_engine::models::{
    get_high_risk_accounts, AggregationStrategy, CheckpointStore, Predictor,
};
use mule_detection_engine::synthetic::DatasetGenerator;
use mule_detection_engine::trainer::{StopReason, Trainer, TrainerState};
use mule_detection_engine::{DetectionError, GraphBuilder, NodeSplit, RiskLabel, Transfer};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn reference_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn quick_config() -> ModelConfig {
    ModelConfig {
        hidden_channels: 16,
        epochs: 40,
        patience: 15,
        ..Default::default()
    }
}

#[test]
fn test_train_then_predict() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint_path = dir.path().join("checkpoints/best_model.json");
    let dataset = DatasetGenerator::with_reference_time(42, reference_time()).generate(30, 5, 4);

    let profiles = dataset.account_profiles(reference_time());
    let (graph, info) = GraphBuilder::seeded(42)
        .build_graph_with_profiles(&dataset.transactions, Some(&dataset.labels), &profiles)
        .unwrap();
    assert!(info.num_nodes > 20 && info.num_nodes <= 50);
    assert_eq!(graph.features.ncols(), FEATURE_COUNT);

    let mut rng = StdRng::seed_from_u64(42);
    let split = NodeSplit::random(graph.num_nodes(), 0.6, 0.2, &mut rng).unwrap();

    let mut trainer =
        Trainer::new(quick_config(), CheckpointStore::new(&checkpoint_path), Some(42)).unwrap();
    let (_, report) = trainer.train(&graph, &split).unwrap();
    assert_eq!(trainer.state(), TrainerState::Evaluated);
    assert!(matches!(
        report.stop_reason,
        StopReason::EarlyStopped | StopReason::EpochsExhausted
    ));
    assert!((0.0..=1.0).contains(&report.test.f1));

    let mut predictor = Predictor::new(
        CheckpointStore::new(&checkpoint_path),
        AggregationStrategy::detect(),
        GraphBuilder::seeded(1),
    )
    .unwrap();
    assert!(report.best_epoch.is_some());
    assert!(predictor.is_ready());

    let predictions = predictor.predict(&dataset.transactions, 0.5).unwrap();
    assert_eq!(predictions.len(), info.num_nodes);
    for pair in predictions.windows(2) {
        assert!(pair[0].fraud_probability >= pair[1].fraud_probability);
    }
    for p in &predictions {
        assert!(p.risk_score <= 100);
        assert_eq!(p.risk_score, (p.fraud_probability * 100.0).floor() as u8);
        assert_eq!(p.label == RiskLabel::Fraud, p.fraud_probability >= 0.5);
        assert_eq!(p.is_suspicious, p.fraud_probability >= 0.5);
    }

    let high = get_high_risk_accounts(&predictions, 70);
    assert!(high.iter().all(|p| p.risk_score >= 70));
    assert_eq!(
        high.len(),
        predictions.iter().filter(|p| p.risk_score >= 70).count()
    );
}

#[test]
fn test_sparse_and_dense_predictors_agree() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint_path = dir.path().join("best_model.json");
    let dataset = DatasetGenerator::with_reference_time(5, reference_time()).generate(20, 3, 4);
    let (graph, _) = GraphBuilder::seeded(5)
        .build_graph(&dataset.transactions, Some(&dataset.labels))
        .unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    let split = NodeSplit::random(graph.num_nodes(), 0.6, 0.2, &mut rng).unwrap();

    let mut trainer =
        Trainer::new(quick_config(), CheckpointStore::new(&checkpoint_path), Some(5)).unwrap();
    let (_, report) = trainer.train(&graph, &split).unwrap();
    assert!(report.best_epoch.is_some());

    let score = |strategy| {
        let mut predictor = Predictor::new(
            CheckpointStore::new(&checkpoint_path),
            strategy,
            GraphBuilder::seeded(77),
        )
        .unwrap();
        predictor.predict(&dataset.transactions, 0.5).unwrap()
    };
    let sparse = score(AggregationStrategy::Sparse);
    let dense = score(AggregationStrategy::Dense);

    assert_eq!(sparse.len(), dense.len());
    for s in &sparse {
        let d = dense.iter().find(|d| d.account_id == s.account_id).unwrap();
        assert!((s.fraud_probability - d.fraud_probability).abs() < 1e-9);
    }
}

#[test]
fn test_empty_batch_predicts_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint_path = dir.path().join("best_model.json");
    let dataset = DatasetGenerator::with_reference_time(8, reference_time()).generate(20, 3, 4);
    let (graph, _) = GraphBuilder::seeded(8)
        .build_graph(&dataset.transactions, Some(&dataset.labels))
        .unwrap();
    let mut rng = StdRng::seed_from_u64(8);
    let split = NodeSplit::random(graph.num_nodes(), 0.6, 0.2, &mut rng).unwrap();
    let (model, _) = Trainer::new(quick_config(), CheckpointStore::new(&checkpoint_path), Some(8))
        .unwrap()
        .train(&graph, &split)
        .unwrap();

    let (empty, info) = GraphBuilder::seeded(0).build_graph(&[], None).unwrap();
    assert_eq!(info.num_nodes, 0);
    assert_eq!(empty.num_edges(), 0);

    let mut predictor = Predictor::from_model(
        model,
        CheckpointStore::new(&checkpoint_path),
        GraphBuilder::seeded(0),
    );
    assert!(predictor.predict(&[], 0.5).unwrap().is_empty());
}

#[test]
fn test_predictor_requires_training() {
    let dir = tempfile::tempdir().unwrap();
    let mut predictor = Predictor::new(
        CheckpointStore::new(dir.path().join("missing.json")),
        AggregationStrategy::Sparse,
        GraphBuilder::seeded(0),
    )
    .unwrap();

    assert!(!predictor.is_ready());
    let err = predictor
        .predict(&[Transfer::new("A", "B", 10.0)], 0.5)
        .unwrap_err();
    assert!(matches!(err, DetectionError::ModelNotTrained { .. }));

    let err = predictor
        .predict_from_json(r#"{"transactions": [{"debtor": "A", "creditor": "B", "amount": 1}]}"#, 0.5)
        .unwrap_err();
    assert!(err.is_model_not_trained());
}

#[test]
fn test_malformed_json_batch_rejected_before_scoring() {
    let dir = tempfile::tempdir().unwrap();
    let mut predictor = Predictor::new(
        CheckpointStore::new(dir.path().join("missing.json")),
        AggregationStrategy::Sparse,
        GraphBuilder::seeded(0),
    )
    .unwrap();

    let err = predictor.predict_from_json("not json", 0.5).unwrap_err();
    assert!(matches!(err, DetectionError::Serialization(_)));
}
