use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder, linear};

#[derive(Debug, Clone)]
pub struct Mlp {
    layers: Vec<Linear>,
    out_dim: usize,
}

impl Mlp {
    pub fn out_dim(&self) -> usize {
        self.out_dim
    }
}

impl Module for Mlp {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = xs.clone();
        let num_layers = self.layers.len();
        for (layer_idx, layer) in self.layers.iter().enumerate() {
            xs = layer.forward(&xs)?;
            if layer_idx != num_layers - 1 {
                xs = xs.relu()?;
            }
        }
        Ok(xs)
    }
}

pub fn build_sequential(
    input_dim: usize,
    layers: &[usize],
    vb: &VarBuilder,
    prefix: &str,
) -> Result<Mlp> {
    let mut last_dim = input_dim;
    let mut nn = Vec::with_capacity(layers.len());
    for (layer_idx, layer_size) in layers.iter().enumerate() {
        let layer_pp = format!("{prefix}{layer_idx}");
        nn.push(linear(last_dim, *layer_size, vb.pp(layer_pp))?);
        last_dim = *layer_size;
    }
    Ok(Mlp {
        layers: nn,
        out_dim: last_dim,
    })
}

#[cfg(test)]
mod test {
    use super::build_sequential;
    use candle_core::{DType, Device, Result, Tensor};
    use candle_nn::{Module, VarBuilder, VarMap};

    #[test]
    fn test_build_sequential_shapes() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let mlp = build_sequential(4, &[8, 8, 2], &vb, "layer")?;
        assert_eq!(mlp.out_dim(), 2);
        let out = mlp.forward(&Tensor::ones((3, 4), DType::F32, &Device::Cpu)?)?;
        assert_eq!(out.dims(), &[3, 2]);
        // three weight and three bias tensors
        assert_eq!(varmap.all_vars().len(), 6);
        Ok(())
    }
}
