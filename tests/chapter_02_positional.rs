use seq2seq_rs::positional::{positional_mask, FrequencyIndex, PositionalEncoder};
use seq2seq_rs::tensor::Tensor;

#[test]
fn test_position_zero_adds_ones_and_zeros() {
    for d_model in [1, 3, 8, 33] {
        let x = Tensor::<f64, 3>::from_fn([2, 4, d_model], |[b, l, i]| (b + l + i) as f64 * 0.1);
        let out = PositionalEncoder::default().forward(&x).unwrap();
        for b in 0..2 {
            for i in 0..d_model {
                let offset = if i % 2 == 0 { 1.0 } else { 0.0 };
                let got = out.get([b, 0, i]).unwrap() - x.get([b, 0, i]).unwrap();
                assert!((got - offset).abs() < 1e-12);
            }
        }
    }
}

#[test]
fn test_mask_is_deterministic() {
    let a = positional_mask::<f32>(7, 12, FrequencyIndex::Raw);
    let b = positional_mask::<f32>(7, 12, FrequencyIndex::Raw);
    assert_eq!(a, b);

    let encoder = PositionalEncoder::new(FrequencyIndex::Raw);
    let x = Tensor::<f32, 3>::zeros([1, 7, 12]);
    assert_eq!(encoder.forward(&x).unwrap(), encoder.forward(&x).unwrap());
}

#[test]
fn test_mask_recomputed_per_length() {
    let short = positional_mask::<f64>(3, 6, FrequencyIndex::Raw);
    let long = positional_mask::<f64>(9, 6, FrequencyIndex::Raw);
    // The shared prefix does not depend on the length requested.
    assert_eq!(short.data(), &long.data()[..18]);

    let encoder = PositionalEncoder::default();
    for len in [1, 5, 11] {
        let x = Tensor::<f64, 3>::zeros([2, len, 6]);
        assert_eq!(encoder.forward(&x).unwrap().shape(), &[2, len, 6]);
    }
}

#[test]
fn test_values_bounded() {
    for freq in [FrequencyIndex::Raw, FrequencyIndex::Paired] {
        let table = positional_mask::<f64>(50, 16, freq);
        assert!(table.data().iter().all(|v| v.abs() <= 1.0));
    }
}

#[test]
fn test_raw_and_paired_differ_beyond_first_pair() {
    let raw = positional_mask::<f64>(4, 8, FrequencyIndex::Raw);
    let paired = positional_mask::<f64>(4, 8, FrequencyIndex::Paired);
    // Feature 0 has omega = 1 in both variants.
    assert!((raw.get([3, 0]).unwrap() - paired.get([3, 0]).unwrap()).abs() < 1e-12);
    // Feature 1 uses omega = 10000^(-2/8) raw but omega = 1 paired.
    assert!((raw.get([3, 1]).unwrap() - paired.get([3, 1]).unwrap()).abs() > 1e-3);
}
