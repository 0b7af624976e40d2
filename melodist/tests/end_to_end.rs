use melodist::prelude::*;

fn small_model(vocab: &Vocabulary, max_positions: usize) -> ModelConfig {
    ModelConfig {
        num_layers: 2,
        d_model: 16,
        num_heads: 2,
        d_feedforward: 32,
        max_positions,
        dropout: 0.1,
        vocab_size: 0,
    }
    .with_vocab_size(vocab.size_with_padding())
}

#[test]
fn test_untrained_generation_keeps_seed() {
    let corpus = Corpus::from_json_str(r#"["C4-1.0, E4-1.0, G4-1.0"]"#).unwrap();
    let vocab = Vocabulary::fit(corpus.melodies());
    assert_eq!(vocab.size_with_padding(), 4);

    let dev = Cpu::seed_from_u64(42);
    let model = MelodyModel::build(&dev, small_model(&vocab, 16)).unwrap();
    let config = GenerateConfig {
        max_length: 5,
        stop_token: None,
    };
    let generator = Generator::new(&model, &vocab, &config).unwrap();

    let seed = Melody::from_exchange_json(r#"["C4-1.0","E4-1.0"]"#).unwrap();
    let out = generator.generate(&seed).unwrap();
    assert_eq!(out.len(), 5);
    let encoded = vocab.encode(&out).unwrap();
    assert_eq!(encoded[..2], [1, 2]);
    assert!(encoded.iter().all(|&i| (1..4).contains(&i)));

    assert_eq!(out, generator.generate(&seed).unwrap());
}

#[test]
fn test_train_save_load_generate() {
    let records = r#"[
        "C4-1.0, D4-1.0, E4-1.0, F4-1.0, G4-2.0",
        "G4-1.0, F4-1.0, E4-1.0, D4-1.0, C4-2.0",
        "C4-1.0, E4-1.0, G4-1.0, E4-1.0, C4-2.0",
        "not a record"
    ]"#;
    let corpus = Corpus::from_json_str(records).unwrap();
    assert_eq!(corpus.len(), 3);
    assert_eq!(corpus.rejected().len(), 1);

    let vocab = Vocabulary::fit(corpus.melodies());
    let train = TrainConfig {
        epochs: 2,
        batch_size: 4,
        learning_rate: 1e-3,
        shuffle_window: 8,
        max_sequence_length: 16,
        seed: 3,
    };
    let dataset = Dataset::from_melodies(&vocab, corpus.melodies(), train.batch_size)
        .unwrap()
        .with_shuffle_window(train.shuffle_window)
        .with_seed(train.seed);
    assert_eq!(dataset.pair_count(), 12);

    let dev = Cpu::seed_from_u64(train.seed);
    let model = MelodyModel::build(&dev, small_model(&vocab, 16)).unwrap();
    let mut trainer = Trainer::from_config(model, &train).unwrap();
    let report = trainer.fit(&dataset, train.epochs).unwrap();
    assert_eq!(report.epoch_losses.len(), 2);
    assert!(report.final_loss().unwrap().is_finite());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("artifact");
    let trained = ModelArtifact::new(trainer.into_model(), vocab.clone()).unwrap();
    trained.save(&path).unwrap();

    let loaded = ModelArtifact::load(&path, &dev).unwrap();
    assert_eq!(loaded.vocabulary, vocab);

    let config = GenerateConfig {
        max_length: 8,
        stop_token: None,
    };
    let seed = Melody::parse_record("C4-1.0, D4-1.0").unwrap();
    let before = Generator::new(&trained.model, &trained.vocabulary, &config)
        .unwrap()
        .generate(&seed)
        .unwrap();
    let after = Generator::new(&loaded.model, &loaded.vocabulary, &config)
        .unwrap()
        .generate(&seed)
        .unwrap();
    assert_eq!(before, after);
    assert_eq!(after.len(), 8);

    // same corpus, same scan order: the rebuilt vocabulary is accepted
    let rebuilt = Vocabulary::fit(corpus.melodies());
    assert!(ModelArtifact::load_with_vocabulary(&path, &dev, rebuilt).is_ok());
}

#[test]
fn test_generated_melody_exports() {
    let melody = Melody::parse_record("C4-1.0, E4-0.5, rest-1.0, G4-2.0").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let summary = write_midi(&melody, &NoteTiming::default(), dir.path().join("m.mid")).unwrap();
    assert_eq!(summary.notes_written, 3);
    assert_eq!(summary.skipped, 1);
}
