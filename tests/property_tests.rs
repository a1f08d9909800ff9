//! Property tests for padding arithmetic, override precedence and backend
//! agreement.

mod common;

use std::sync::Arc;

use common::fixtures::{constant, scalar_i32, tensor, SAME, VALID};
use common::run_outputs;
use nnforge::codegen::padding::{output_extent, same};
use nnforge::codegen::{compile, BackendPolicy};
use nnforge::graph::{Conv2DParam, Model, Node, OpKind, Operation, PaddingType, Pool2DParam};
use proptest::prelude::*;

fn pseudo_values(len: usize, seed: u32) -> Vec<f32> {
    (0..len)
        .map(|i| ((i as u32).wrapping_mul(seed).wrapping_add(7) % 17) as f32 * 0.125 - 1.0)
        .collect()
}

struct ConvCase {
    h: usize,
    w: usize,
    c: usize,
    out_c: usize,
    kh: usize,
    kw: usize,
    stride_h: usize,
    stride_w: usize,
    padding: i32,
    activation: i32,
}

impl ConvCase {
    fn padding_type(&self) -> PaddingType {
        PaddingType::from_code(self.padding).unwrap()
    }

    fn output_hw(&self) -> (usize, usize) {
        let padding = self.padding_type();
        (
            output_extent(padding, self.h, self.kh, self.stride_h).unwrap(),
            output_extent(padding, self.w, self.kw, self.stride_w).unwrap(),
        )
    }

    fn model(&self, seed: u32) -> Model {
        let mut model = Model::new();
        let (oh, ow) = self.output_hw();
        let input = tensor(&mut model, &[1, self.h, self.w, self.c]);
        let kernel_len = self.out_c * self.kh * self.kw * self.c;
        let kernel = constant(
            &mut model,
            &[self.out_c, self.kh, self.kw, self.c],
            &pseudo_values(kernel_len, seed),
        );
        let bias = constant(&mut model, &[self.out_c], &pseudo_values(self.out_c, seed + 1));
        let output = tensor(&mut model, &[1, oh, ow, self.out_c]);
        let param = Conv2DParam {
            padding: scalar_i32(&mut model, self.padding),
            hstride: scalar_i32(&mut model, self.stride_w as i32),
            vstride: scalar_i32(&mut model, self.stride_h as i32),
            activation: scalar_i32(&mut model, self.activation),
        };
        model
            .add_operation(Operation::Conv2D(Node::new(vec![input, kernel, bias], vec![output], param)))
            .unwrap();

        // average pool over the whole output keeps a second window op in play
        let pooled = tensor(&mut model, &[1, 1, 1, self.out_c]);
        let pool = Pool2DParam {
            padding: scalar_i32(&mut model, VALID),
            hstride: scalar_i32(&mut model, 1),
            vstride: scalar_i32(&mut model, 1),
            kw: scalar_i32(&mut model, ow as i32),
            kh: scalar_i32(&mut model, oh as i32),
            activation: scalar_i32(&mut model, 0),
        };
        model
            .add_operation(Operation::AvgPool2D(Node::new(vec![output], vec![pooled], pool)))
            .unwrap();

        model.add_input(input).unwrap();
        model.add_output(output).unwrap();
        model.add_output(pooled).unwrap();
        model
    }
}

proptest! {
    #[test]
    fn test_same_padding_covers_input(
        input in 1..64usize,
        kernel in 1..8usize,
        stride in 1..5usize
    ) {
        let output = output_extent(PaddingType::Same, input, kernel, stride).unwrap();
        prop_assert_eq!(output, (input + stride - 1) / stride);

        let (lead, trail) = same(input, output, kernel, stride);
        prop_assert!(lead <= trail && trail <= lead + 1);
        // the last window ends exactly at the padded edge
        prop_assert!((output - 1) * stride + kernel <= input + lead + trail);
        prop_assert!(lead + trail < kernel);
    }

    #[test]
    fn test_valid_windows_stay_inside(
        input in 1..64usize,
        kernel in 1..8usize,
        stride in 1..5usize
    ) {
        match output_extent(PaddingType::Valid, input, kernel, stride) {
            Some(output) => {
                prop_assert!(output >= 1);
                prop_assert!((output - 1) * stride + kernel <= input);
                prop_assert!(output * stride + kernel > input);
            }
            None => prop_assert!(kernel > input),
        }
    }
}

fn backend_id() -> impl Strategy<Value = Option<&'static str>> {
    prop_oneof![Just(None), Just(Some("cpu")), Just(Some("gpu")), Just(Some("none"))]
}

proptest! {
    #[test]
    fn test_override_precedence(
        all_ops in backend_id(),
        per_op in proptest::collection::vec((0..OpKind::ALL.len(), backend_id()), 0..6),
        queried in 0..OpKind::ALL.len()
    ) {
        let mut pairs: Vec<(String, String)> = Vec::new();
        if let Some(id) = all_ops {
            pairs.push(("OP_BACKEND_ALLOPS".to_string(), id.to_string()));
        }
        for (kind, id) in &per_op {
            if let Some(id) = id {
                pairs.push((OpKind::ALL[*kind].name().to_string(), id.to_string()));
            }
        }
        let policy = BackendPolicy::from_pairs(pairs).with_default_backend("cpu");
        let kind = OpKind::ALL[queried];

        // last non-"none" entry for a key wins
        let last_per_op = per_op
            .iter()
            .rev()
            .filter(|(k, _)| *k == queried)
            .find_map(|(_, id)| id.filter(|id| *id != "none"));
        let expected = all_ops
            .filter(|id| *id != "none")
            .or(last_per_op)
            .unwrap_or("cpu");
        prop_assert_eq!(policy.backend_for(kind), expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_cpu_and_gpu_agree_on_conv(
        h in 1..6usize,
        w in 1..6usize,
        c in 1..4usize,
        out_c in 1..4usize,
        kh in 1..4usize,
        kw in 1..4usize,
        stride_h in 1..3usize,
        stride_w in 1..3usize,
        same_padding in any::<bool>(),
        activation in 0..4i32,
        seed in 1..1000u32
    ) {
        let padding = if same_padding { SAME } else { VALID };
        prop_assume!(same_padding || (kh <= h && kw <= w));
        let case = ConvCase { h, w, c, out_c, kh, kw, stride_h, stride_w, padding, activation };
        let input = pseudo_values(h * w * c, seed + 2);

        let cpu = Arc::new(
            compile(case.model(seed), &common::registry(), &BackendPolicy::new().with_all_ops("cpu")).unwrap(),
        );
        let gpu = Arc::new(
            compile(case.model(seed), &common::registry(), &BackendPolicy::new().with_all_ops("gpu")).unwrap(),
        );
        let expected: Vec<f32> = run_outputs(&cpu, &[input.clone()]).unwrap().concat();
        let actual: Vec<f32> = run_outputs(&gpu, &[input]).unwrap().concat();
        prop_assert_eq!(expected.len(), out_c * (1 + case.output_hw().0 * case.output_hw().1));
        prop_assert_eq!(actual.len(), expected.len());
        for (e, a) in expected.iter().zip(&actual) {
            prop_assert!((e - a).abs() <= 1e-4, "cpu {:?} gpu {:?}", expected, actual);
        }
    }
}
