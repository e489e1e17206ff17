use seq2seq_rs::checkpoint;
use seq2seq_rs::config::TransformerConfig;
use seq2seq_rs::models::Transformer;
use seq2seq_rs::nn::{Mode, Module};
use seq2seq_rs::tensor::Tensor;
use seq2seq_rs::Error;

fn config() -> TransformerConfig {
    TransformerConfig::new(20, 20).with_d_model(8).with_n_heads(2)
}

#[test]
fn test_save_and_restore_model() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.safetensors");

    let source = Tensor::new(vec![5, 17, 3, 0, 0], [1, 5]).unwrap();
    let history = Tensor::new(vec![2, 9, 0, 0], [1, 4]).unwrap();

    let model = Transformer::<f32>::new(config()).unwrap();
    let expected = model.forward(&source, &history, Mode::Inference).unwrap();
    let written = checkpoint::save(&path, &model).unwrap();
    assert_eq!(written, model.parameters().len());

    // Restoring materialises every lazy layer; no warm-up pass needed.
    let mut restored = Transformer::<f32>::new(config().with_seed(1)).unwrap();
    checkpoint::restore(&path, &mut restored).unwrap();
    assert_eq!(restored.num_parameters(), model.num_parameters());
    assert_eq!(
        restored.forward(&source, &history, Mode::Inference).unwrap(),
        expected
    );
}

#[test]
fn test_unmaterialised_model_cannot_be_restored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("embeddings_only.safetensors");

    // Only the embedding tables exist before the first forward pass.
    let model = Transformer::<f32>::new(config()).unwrap();
    assert_eq!(checkpoint::save(&path, &model).unwrap(), 2);

    let mut other = Transformer::<f32>::new(config().with_seed(7)).unwrap();
    let history = Tensor::new(vec![1, 2], [1, 2]).unwrap();
    other.forward(&history, &history, Mode::Inference).unwrap();
    let before = other.state_dict();

    assert!(matches!(
        checkpoint::restore(&path, &mut other),
        Err(Error::MissingParameter(_))
    ));
    // The embedding tables were readable, but nothing may be replaced on failure.
    assert_eq!(other.state_dict(), before);
}

#[test]
fn test_precision_must_match() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f64.safetensors");

    let model = Transformer::<f64>::new(config()).unwrap();
    checkpoint::save(&path, &model).unwrap();

    let mut single = Transformer::<f32>::new(config()).unwrap();
    assert!(matches!(
        checkpoint::restore(&path, &mut single),
        Err(Error::DtypeMismatch { .. })
    ));
}

#[test]
fn test_vocabulary_change_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.safetensors");

    let model = Transformer::<f32>::new(config()).unwrap();
    let source = Tensor::new(vec![1, 2], [1, 2]).unwrap();
    model.forward(&source, &source, Mode::Inference).unwrap();
    checkpoint::save(&path, &model).unwrap();

    let bigger_config = TransformerConfig::new(20, 25)
        .with_d_model(8)
        .with_n_heads(2)
        .with_seed(5);
    let mut bigger = Transformer::<f32>::new(bigger_config).unwrap();
    bigger.forward(&source, &source, Mode::Inference).unwrap();
    let before = bigger.state_dict();

    // The encoder matches; the decoder's target vocabulary does not.
    assert!(checkpoint::restore(&path, &mut bigger).is_err());
    assert_eq!(bigger.state_dict(), before);
}

#[test]
fn test_failed_restore_leaves_lazy_layers_unmaterialised() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("embeddings_only.safetensors");
    checkpoint::save(&path, &Transformer::<f32>::new(config()).unwrap()).unwrap();

    let mut fresh = Transformer::<f32>::new(config().with_seed(3)).unwrap();
    let before = fresh.state_dict();
    assert_eq!(before.len(), 2);
    assert!(checkpoint::restore(&path, &mut fresh).is_err());
    assert_eq!(fresh.state_dict(), before);
}
