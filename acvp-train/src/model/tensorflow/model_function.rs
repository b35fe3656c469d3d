use anyhow::{anyhow, Result};
use tensorflow::{Graph, MetaGraphDef, Operation, Session, SessionRunArgs, Tensor, TensorType};

/// A named signature of the saved model: feeds `in_names` in order and fetches `out_names` in order.
pub struct ModelFunction<'a> {
    name: &'a str,
    in_names: &'a [&'a str],
    out_names: &'a [&'a str],
}

impl<'a> ModelFunction<'a> {
    pub fn new(
        name: &'a str,
        in_names: &'a [&'a str],
        out_names: &'a [&'a str],
    ) -> Result<Self> {
        Ok(Self {
            name,
            in_names,
            out_names,
        })
    }

    pub fn name(&self) -> &str {
        self.name
    }

    fn check_arity(
        &self,
        num_inputs: usize,
    ) -> Result<()> {
        if num_inputs != self.in_names.len() {
            return Err(anyhow!(
                "signature '{}' takes {} inputs, got {}",
                self.name,
                self.in_names.len(),
                num_inputs
            ));
        }
        Ok(())
    }

    /// All inputs share one element type, as do all outputs
    pub fn apply<I: TensorType, O: TensorType>(
        &self,
        graph: &Graph,
        meta_graph_def: &MetaGraphDef,
        session: &Session,
        inputs: &[&Tensor<I>],
    ) -> Result<Vec<Tensor<O>>> {
        self.check_arity(inputs.len())?;
        let signature = meta_graph_def.get_signature(self.name)?;

        let input_operations = self
            .in_names
            .iter()
            .map(|n| Ok(graph.operation_by_name_required(&signature.get_input(n)?.name().name)?))
            .collect::<Result<Vec<Operation>>>()?;
        let output_operations = self
            .out_names
            .iter()
            .map(|n| Ok(graph.operation_by_name_required(&signature.get_output(n)?.name().name)?))
            .collect::<Result<Vec<Operation>>>()?;

        let mut args = SessionRunArgs::new();
        for (operation, tensor) in input_operations.iter().zip(inputs) {
            args.add_feed(operation, 0, tensor);
        }
        let tokens: Vec<_> = output_operations.iter().map(|o| args.request_fetch(o, 0)).collect();

        session.run(&mut args)?;
        tokens.into_iter().map(|t| Ok(args.fetch(t)?)).collect()
    }
}
