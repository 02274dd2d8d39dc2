//! Operator set
//!
//! The example network needs exactly these eighteen kinds. Registration
//! order is fixed and the registry is sized to fit them with no spare slot.

use crate::HarnessError;
use micro_engine::{BuiltinOperator, EngineError, OpResolver};
use tracing::error;

/// Registry capacity used by both entry points
pub const OP_COUNT: usize = 18;

/// Registered operators, in registration order
pub const REGISTERED_OPS: [BuiltinOperator; OP_COUNT] = [
    BuiltinOperator::FullyConnected,
    BuiltinOperator::Reshape,
    BuiltinOperator::MaxPool2D,
    BuiltinOperator::Slice,
    BuiltinOperator::Logistic,
    BuiltinOperator::Add,
    BuiltinOperator::Mul,
    BuiltinOperator::Tanh,
    BuiltinOperator::Concatenation,
    BuiltinOperator::Transpose,
    BuiltinOperator::Unpack,
    BuiltinOperator::Conv2D,
    BuiltinOperator::Split,
    BuiltinOperator::StridedSlice,
    BuiltinOperator::Pack,
    BuiltinOperator::Shape,
    BuiltinOperator::ExpandDims,
    BuiltinOperator::Softmax,
];

/// Register the operator set, stopping at the first failure
pub fn register_ops<const N: usize>(resolver: &mut OpResolver<N>) -> Result<(), HarnessError> {
    let steps: [fn(&mut OpResolver<N>) -> Result<(), EngineError>; OP_COUNT] = [
        OpResolver::add_fully_connected,
        OpResolver::add_reshape,
        OpResolver::add_max_pool_2d,
        OpResolver::add_slice,
        OpResolver::add_logistic,
        OpResolver::add_add,
        OpResolver::add_mul,
        OpResolver::add_tanh,
        OpResolver::add_concatenation,
        OpResolver::add_transpose,
        OpResolver::add_unpack,
        OpResolver::add_conv_2d,
        OpResolver::add_split,
        OpResolver::add_strided_slice,
        OpResolver::add_pack,
        OpResolver::add_shape,
        OpResolver::add_expand_dims,
        OpResolver::add_softmax,
    ];
    for (op, add) in REGISTERED_OPS.into_iter().zip(steps) {
        add(resolver).map_err(|e| {
            error!("Failed to register {}: {}", op, e);
            HarnessError::OpRegistration(e)
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use micro_engine::OpLookup;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_registers_all_in_order() {
        let mut resolver = OpResolver::<OP_COUNT>::new();
        register_ops(&mut resolver).unwrap();
        assert_eq!(resolver.len(), OP_COUNT);
        assert_eq!(resolver.registered(), &REGISTERED_OPS[..]);
    }

    #[test]
    fn test_fresh_registries_agree() {
        let mut a = OpResolver::<OP_COUNT>::new();
        let mut b = OpResolver::<OP_COUNT>::new();
        register_ops(&mut a).unwrap();
        register_ops(&mut b).unwrap();
        assert_eq!(a.registered(), b.registered());
    }

    #[test]
    fn test_second_pass_on_same_registry_fails() {
        let mut resolver = OpResolver::<OP_COUNT>::new();
        register_ops(&mut resolver).unwrap();
        assert!(matches!(
            register_ops(&mut resolver),
            Err(HarnessError::OpRegistration(EngineError::DuplicateOperator(
                BuiltinOperator::FullyConnected
            )))
        ));
    }

    #[test]
    fn test_small_registry_stops_at_capacity() {
        let mut resolver = OpResolver::<4>::new();
        let err = register_ops(&mut resolver).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::OpRegistration(EngineError::RegistryFull {
                op: BuiltinOperator::Logistic,
                capacity: 4
            })
        ));
        assert_eq!(resolver.len(), 4);
    }

    #[test]
    fn test_covers_example_model() {
        let mut resolver = OpResolver::<OP_COUNT>::new();
        register_ops(&mut resolver).unwrap();
        for op in micro_engine::example_lstm_model().operator_kinds() {
            assert!(resolver.find(op), "{} not registered", op);
        }
    }

    proptest! {
        #[test]
        fn prop_membership_is_order_independent(seed in any::<u64>()) {
            // Fisher-Yates with a seeded LCG
            let mut order = REGISTERED_OPS;
            let mut state = seed;
            for i in (1..order.len()).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                order.swap(i, (state >> 33) as usize % (i + 1));
            }

            let mut shuffled = OpResolver::<OP_COUNT>::new();
            for op in order {
                shuffled.add(op).unwrap();
            }
            let mut canonical = OpResolver::<OP_COUNT>::new();
            register_ops(&mut canonical).unwrap();

            let a: HashSet<_> = shuffled.registered().iter().copied().collect();
            let b: HashSet<_> = canonical.registered().iter().copied().collect();
            prop_assert_eq!(a, b);
        }
    }
}
