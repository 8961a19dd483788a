//! Functions registered by the daemon for cycle files to use.

use std::sync::Arc;

use vantage_core::Value;
use vantage_services::{FnFunction, FunctionError, FunctionInvocation, InMemoryFunctionRepository};

pub fn register_all(repo: &InMemoryFunctionRepository) {
    repo.register(Arc::new(FnFunction::new("sum", |inv: &FunctionInvocation| {
        let total: f64 = numeric_inputs(inv)?.iter().sum();
        Ok(answer_all(inv, Value::Double(total)))
    })));

    repo.register(Arc::new(FnFunction::new("product", |inv: &FunctionInvocation| {
        let product: f64 = numeric_inputs(inv)?.iter().product();
        Ok(answer_all(inv, Value::Double(product)))
    })));

    repo.register(Arc::new(FnFunction::new("identity", |inv: &FunctionInvocation| {
        let (_, first) = inv
            .inputs
            .iter()
            .next()
            .ok_or_else(|| FunctionError::new("NoInput", "identity needs one input"))?;
        Ok(answer_all(inv, first.clone()))
    })));

    repo.register(Arc::new(FnFunction::new("require_positive", |inv: &FunctionInvocation| {
        let values = numeric_inputs(inv)?;
        if let Some(bad) = values.iter().find(|v| **v <= 0.0) {
            return Err(FunctionError::new("NonPositiveValue", format!("{bad} is not positive")));
        }
        let total: f64 = values.iter().sum();
        Ok(answer_all(inv, Value::Double(total)))
    })));
}

fn numeric_inputs(inv: &FunctionInvocation) -> Result<Vec<f64>, FunctionError> {
    inv.inputs
        .iter()
        .map(|(d, v)| {
            v.as_f64()
                .ok_or_else(|| FunctionError::new("NotNumeric", format!("input {d} is not numeric")))
        })
        .collect()
}

fn answer_all(inv: &FunctionInvocation, value: Value) -> Vec<vantage_core::ComputedValue> {
    inv.desired.iter().map(|r| inv.output(r, value.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vantage_core::{TargetSpec, ValueDescriptor, ValueProperties, ValueRequest};
    use vantage_services::{FunctionInputs, FunctionRepository};

    fn invocation(function_id: &str, inputs: Vec<Value>) -> FunctionInvocation {
        let target = TargetSpec::primitive("P");
        FunctionInvocation {
            function_id: function_id.into(),
            target: target.clone(),
            inputs: FunctionInputs::new(
                inputs
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| {
                        (
                            ValueDescriptor::new(format!("In{i}"), target.clone(), "md", ValueProperties::none()),
                            Arc::new(v),
                        )
                    })
                    .collect(),
            ),
            desired: vec![ValueRequest::new("Out", target, ValueProperties::none())],
        }
    }

    #[test]
    fn builtins_compute() {
        let repo = InMemoryFunctionRepository::new();
        register_all(&repo);

        let sum = repo.resolve("sum").unwrap();
        let out = sum.execute(&invocation("sum", vec![Value::Double(1.5), Value::Integer(2)])).unwrap();
        assert_eq!(out[0].value, Value::Double(3.5));

        let product = repo.resolve("product").unwrap();
        let out = product
            .execute(&invocation("product", vec![Value::Double(1.5), Value::Integer(2)]))
            .unwrap();
        assert_eq!(out[0].value, Value::Double(3.0));

        let err = repo
            .resolve("require_positive")
            .unwrap()
            .execute(&invocation("require_positive", vec![Value::Double(-1.0)]))
            .unwrap_err();
        assert_eq!(err.kind, "NonPositiveValue");

        let err = sum.execute(&invocation("sum", vec![Value::Text("x".into())])).unwrap_err();
        assert_eq!(err.kind, "NotNumeric");
    }
}
