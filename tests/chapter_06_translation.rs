use seq2seq_rs::config::TransformerConfig;
use seq2seq_rs::loss::{masked_accuracy, masked_cross_entropy};
use seq2seq_rs::models::Transformer;
use seq2seq_rs::nn::{Mode, Module};
use seq2seq_rs::tensor::Tensor;

fn config() -> TransformerConfig {
    TransformerConfig::new(40, 30)
        .with_d_model(16)
        .with_n_heads(2)
        .with_max_decode_len(6)
        .with_seed(7)
}

#[test]
fn test_shifted_target_step() {
    let model = Transformer::<f64>::new(config()).unwrap();
    // Decoder input is the target shifted right; labels are the target shifted left.
    let source = Tensor::new(vec![5, 17, 3, 0, 0, 8, 8, 1, 4, 0], [2, 5]).unwrap();
    let history = Tensor::new(vec![2, 9, 11, 0, 2, 4, 0, 0], [2, 4]).unwrap();
    let labels = Tensor::new(vec![9, 11, 3, 0, 4, 3, 0, 0], [2, 4]).unwrap();

    let probs = model.forward(&source, &history, Mode::Training).unwrap();
    assert_eq!(probs.shape(), &[2, 4, 30]);

    let loss = masked_cross_entropy(&probs, &labels, 0).unwrap();
    let accuracy = masked_accuracy(&probs, &labels, 0).unwrap();
    assert!(loss.is_finite() && loss > 0.0);
    assert!((0.0..=1.0).contains(&accuracy));

    // An untrained model is close to uniform over the vocabulary.
    assert!(loss < 3.0 * (30f64).ln());
}

#[test]
fn test_greedy_translation_stops_at_configured_length() {
    let model = Transformer::<f32>::new(config()).unwrap();
    let source = Tensor::new(vec![5, 17, 3, 0, 0], [1, 5]).unwrap();
    let out = model.translate(&source).unwrap();
    let [batch, length] = *out.shape();
    assert_eq!(batch, 1);
    assert!(length <= 1 + 6);
    assert_eq!(out.data()[0], 2);
}

#[test]
fn test_greedy_is_reproducible() {
    let a = Transformer::<f64>::new(config()).unwrap();
    let b = Transformer::<f64>::new(config()).unwrap();
    let source = Tensor::new(vec![5, 17, 3, 0, 0, 9, 9, 9, 9, 9], [2, 5]).unwrap();
    assert_eq!(
        a.translate_greedy(&source, 8).unwrap(),
        b.translate_greedy(&source, 8).unwrap()
    );
}

#[test]
fn test_parameters_exposed_for_optimizer() {
    let mut model = Transformer::<f32>::new(config()).unwrap();
    let source = Tensor::new(vec![5, 17, 3], [1, 3]).unwrap();
    let history = Tensor::new(vec![2, 9], [1, 2]).unwrap();
    let before = model.forward(&source, &history, Mode::Inference).unwrap();

    let names: Vec<String> = model.parameters().into_iter().map(|(n, _)| n).collect();
    assert!(names.contains(&"encoder.embedding.weight".to_string()));
    assert!(names.contains(&"encoder.attention.heads.0.query.weight".to_string()));
    assert!(names.contains(&"decoder.cross_attention.heads.1.key.bias".to_string()));
    assert!(names.contains(&"decoder.projection.weight".to_string()));

    // A (trivial) optimizer step through the mutable views.
    for (name, param) in model.parameters_mut() {
        if name == "decoder.projection.bias" {
            param.data[0] += 100.0;
        }
    }
    let after = model.forward(&source, &history, Mode::Inference).unwrap();
    assert_ne!(before, after);
    // Token 0 now dominates every position.
    assert!(after.argmax_last().data().iter().all(|&t| t == 0));
}

#[test]
fn test_load_parameters_copies_model() {
    let source = Tensor::new(vec![5, 17, 3, 0], [1, 4]).unwrap();
    let history = Tensor::new(vec![2, 9, 4], [1, 3]).unwrap();

    let trained = Transformer::<f64>::new(config()).unwrap();
    let expected = trained.forward(&source, &history, Mode::Inference).unwrap();

    let mut fresh = Transformer::<f64>::new(config().with_seed(99)).unwrap();
    fresh.load_parameters("", &trained.state_dict()).unwrap();
    assert_eq!(fresh.num_parameters(), trained.num_parameters());
    assert_eq!(
        fresh.forward(&source, &history, Mode::Inference).unwrap(),
        expected
    );
}
