//! LSTM cell and the masked sequential scan used by the recurrent leaf encoders.

use crate::client::ParserClient;
use crate::error::{Error, Result};
use crate::nn::init::Init;
use crate::nn::linear::Linear;
use crate::nn::module::{Module, prefixed};
use crate::nn::var_builder::VarBuilder;
use crate::ops::host::read_f32;
use crate::ops::var_contiguous;
use numr::autograd::{Var, var_add, var_cat, var_mul, var_narrow, var_sigmoid, var_tanh};
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// Single LSTM step with PyTorch gate order `(i, f, g, o)`.
///
/// `gates = x @ W_ih^T + b_ih + h @ W_hh^T + b_hh`, then
/// `c' = σ(f)·c + σ(i)·tanh(g)` and `h' = σ(o)·tanh(c')`.
pub struct LstmCell<R: Runtime> {
    weight_ih: Linear<R>,
    weight_hh: Linear<R>,
    hidden_dim: usize,
}

impl<R: Runtime<DType = DType>> LstmCell<R> {
    /// Input weights are xavier-uniform, recurrent weights PyTorch-uniform,
    /// biases zero.
    pub fn from_varbuilder<C>(
        vb: &mut VarBuilder<'_, R>,
        client: &C,
        input_dim: usize,
        hidden_dim: usize,
        trainable: bool,
    ) -> Result<Self>
    where
        C: ParserClient<R>,
    {
        let weight_ih = Linear::from_varbuilder(
            &mut vb.pp("ih"),
            client,
            input_dim,
            4 * hidden_dim,
            true,
            Init::XavierUniform,
            trainable,
        )?;
        let weight_hh = Linear::from_varbuilder(
            &mut vb.pp("hh"),
            client,
            hidden_dim,
            4 * hidden_dim,
            true,
            Init::PyTorchLinear,
            trainable,
        )?;
        Ok(Self {
            weight_ih,
            weight_hh,
            hidden_dim,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.weight_ih.in_features()
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// One recurrence step. `x: [..., D]`, `h`/`c`: `[..., H]` with matching leading dims.
    pub fn step<C>(&self, client: &C, x: &Var<R>, h: &Var<R>, c: &Var<R>) -> Result<(Var<R>, Var<R>)>
    where
        C: ParserClient<R>,
        R::Client: ParserClient<R>,
    {
        let gates = var_add(
            &self.weight_ih.forward(client, x)?,
            &self.weight_hh.forward(client, h)?,
            client,
        )
        .map_err(Error::Numr)?;
        let last = gates.shape().len() as isize - 1;
        let gate = |k: usize| -> Result<Var<R>> {
            let chunk = var_narrow(&gates, last, k * self.hidden_dim, self.hidden_dim)
                .map_err(Error::Numr)?;
            Ok(var_contiguous(&chunk))
        };

        let i = var_sigmoid(&gate(0)?, client).map_err(Error::Numr)?;
        let f = var_sigmoid(&gate(1)?, client).map_err(Error::Numr)?;
        let g = var_tanh(&gate(2)?, client).map_err(Error::Numr)?;
        let o = var_sigmoid(&gate(3)?, client).map_err(Error::Numr)?;

        let c_new = var_add(
            &var_mul(&f, c, client).map_err(Error::Numr)?,
            &var_mul(&i, &g, client).map_err(Error::Numr)?,
            client,
        )
        .map_err(Error::Numr)?;
        let h_new = var_mul(&o, &var_tanh(&c_new, client).map_err(Error::Numr)?, client).map_err(Error::Numr)?;
        Ok((h_new, c_new))
    }
}

impl<R: Runtime> Module<R> for LstmCell<R> {
    fn named_parameters(&self) -> Vec<(String, &Var<R>)> {
        let mut params = prefixed("ih", self.weight_ih.named_parameters());
        params.extend(prefixed("hh", self.weight_hh.named_parameters()));
        params
    }
}

/// Scan direction of a [`MaskedLstm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    /// Position 0 first.
    Forward,
    /// Position L-1 first; outputs are still returned in position order.
    Backward,
}

/// Sequential LSTM over `[B, L, D]` with a learned initial state.
///
/// At a masked position the running `(h, c)` is carried over unchanged, so
/// right padding never touches the state of the last valid position. The
/// output at position `t` is the running hidden state after visiting `t`.
pub struct MaskedLstm<R: Runtime> {
    cell: LstmCell<R>,
    h0: Var<R>,
    c0: Var<R>,
}

impl<R: Runtime<DType = DType>> MaskedLstm<R> {
    pub fn from_varbuilder<C>(
        vb: &mut VarBuilder<'_, R>,
        client: &C,
        input_dim: usize,
        hidden_dim: usize,
        trainable: bool,
    ) -> Result<Self>
    where
        C: ParserClient<R>,
    {
        let cell = LstmCell::from_varbuilder(&mut vb.pp("cell"), client, input_dim, hidden_dim, trainable)?;
        let h0 = vb.take_or_init(client, "h0", &[1, 1, hidden_dim], Init::Zeros)?;
        let c0 = vb.take_or_init(client, "c0", &[1, 1, hidden_dim], Init::Zeros)?;
        Ok(Self {
            cell,
            h0: Var::new(h0, trainable),
            c0: Var::new(c0, trainable),
        })
    }

    pub fn hidden_dim(&self) -> usize {
        self.cell.hidden_dim()
    }

    /// Run the scan.
    ///
    /// `x: [B, L, D]`, `mask: [B, L]` (1.0 valid, 0.0 padding). Returns `[B, L, H]`.
    pub fn forward<C>(
        &self,
        client: &C,
        x: &Var<R>,
        mask: &Tensor<R>,
        direction: ScanDirection,
    ) -> Result<Var<R>>
    where
        C: ParserClient<R>,
        R::Client: ParserClient<R>,
    {
        let shape = x.shape().to_vec();
        if shape.len() != 3 || shape[2] != self.cell.input_dim() {
            return Err(Error::ShapeMismatch {
                arg: "x",
                expected: vec![shape.first().copied().unwrap_or(0), 0, self.cell.input_dim()],
                got: shape,
            });
        }
        let (batch, len) = (shape[0], shape[1]);
        Error::check_shape("mask", mask.shape(), &[batch, len])?;
        if len == 0 {
            return Err(Error::InvalidArgument {
                arg: "x",
                reason: "sequence length must be at least 1".into(),
            });
        }

        let hidden = self.hidden_dim();
        let device = x.tensor().device();
        let mask_host = read_f32(mask);

        // [1, 1, H] parameters broadcast against a [B, 1, H] zero base
        let base = Var::new(Tensor::<R>::zeros(&[batch, 1, hidden], DType::F32, device), false);
        let mut h = var_add(&base, &self.h0, client).map_err(Error::Numr)?;
        let mut c = var_add(&base, &self.c0, client).map_err(Error::Numr)?;

        let order: Vec<usize> = match direction {
            ScanDirection::Forward => (0..len).collect(),
            ScanDirection::Backward => (0..len).rev().collect(),
        };

        let mut outputs = Vec::with_capacity(len);
        for t in order {
            let x_t = var_contiguous(&var_narrow(x, 1, t, 1).map_err(Error::Numr)?);
            let (h_new, c_new) = self.cell.step(client, &x_t, &h, &c)?;

            let keep: Vec<f32> = (0..batch).map(|b| mask_host[b * len + t]).collect();
            let drop: Vec<f32> = keep.iter().map(|m| 1.0 - m).collect();
            let keep = Var::new(Tensor::<R>::from_slice(&keep, &[batch, 1, 1], device), false);
            let drop = Var::new(Tensor::<R>::from_slice(&drop, &[batch, 1, 1], device), false);

            h = freeze(client, &h_new, &h, &keep, &drop)?;
            c = freeze(client, &c_new, &c, &keep, &drop)?;
            outputs.push(h.clone());
        }
        if direction == ScanDirection::Backward {
            outputs.reverse();
        }

        let refs: Vec<&Var<R>> = outputs.iter().collect();
        var_cat(&refs, 1, client).map_err(Error::Numr)
    }
}

/// `new·keep + prev·drop`
fn freeze<R, C>(client: &C, new: &Var<R>, prev: &Var<R>, keep: &Var<R>, drop: &Var<R>) -> Result<Var<R>>
where
    R: Runtime<DType = DType>,
    C: ParserClient<R>,
    R::Client: ParserClient<R>,
{
    var_add(
        &var_mul(new, keep, client).map_err(Error::Numr)?,
        &var_mul(prev, drop, client).map_err(Error::Numr)?,
        client,
    )
    .map_err(Error::Numr)
}

impl<R: Runtime> Module<R> for MaskedLstm<R> {
    fn named_parameters(&self) -> Vec<(String, &Var<R>)> {
        let mut params = prefixed("cell", self.cell.named_parameters());
        params.push(("h0".to_string(), &self.h0));
        params.push(("c0".to_string(), &self.c0));
        params
    }
}
