//! Naive CPU reference device for trellis graphs.
//!
//! Correctness over speed: kernels are straight loops over `f32` buffers in
//! x-major layout (dimension 0 varies fastest). The device exists so
//! integration tests and small deployments can evaluate graphs end to end;
//! production backends implement the same [`Device`] trait with real
//! kernels.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use trellis::graph::functor::Functor;
use trellis::graph::meta::{Device, DeviceError};
use trellis::graph::node::Node;
use trellis::ops::opcode::{keys, OpKind, Opcode};
use trellis::tensor::{Shape, RANK_CAP};

/// Reference device over plain vectors, with byte accounting.
#[derive(Default)]
pub struct CpuDevice {
    outstanding: AtomicUsize,
}

impl CpuDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently attributed to this device's allocations.
    pub fn outstanding_bytes(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }
}

impl Device for CpuDevice {
    fn calc(&self, func: &Functor) -> Result<(), DeviceError> {
        let args = func.args();
        let mut inputs: Vec<(Shape, Vec<f32>)> = Vec::with_capacity(args.len());
        for arg in &args {
            let node = arg.node();
            let data = node.value().ok_or_else(|| DeviceError::MissingInput {
                label: node.label(),
            })?;
            inputs.push((node.shape().clone(), data));
        }

        let out_shape = func.shape().clone();
        let out = match func.opcode().kind() {
            OpKind::Unary => unary(func.opcode(), &inputs)?,
            OpKind::Elementwise => elementwise(func.opcode(), &inputs, &out_shape)?,
            OpKind::Reduce => reduce(func, &inputs)?,
            OpKind::Matmul => matmul(func, &inputs)?,
            OpKind::Permute => permute(func, &inputs, &out_shape)?,
            OpKind::Extend => extend(&inputs, &out_shape),
            OpKind::Reshape => reshape(&inputs, &out_shape),
        };

        if !func.has_data() {
            self.allocate(out.len() * std::mem::size_of::<f32>());
        }
        func.store(out);
        Ok(())
    }

    fn allocate(&self, nbytes: usize) {
        self.outstanding.fetch_add(nbytes, Ordering::Relaxed);
    }

    fn deallocate(&self, nbytes: usize) {
        self.outstanding.fetch_sub(nbytes, Ordering::Relaxed);
    }
}

/// Reads `data` (shaped `shape`) at the position `out_idx` denotes in
/// `out_shape`, wrapping size-1 axes for broadcast.
fn broadcast_read(shape: &Shape, data: &[f32], out_shape: &Shape, out_idx: usize) -> f32 {
    if data.len() == 1 {
        return data[0];
    }
    let mut remaining = out_idx;
    let mut in_idx = 0usize;
    let mut in_stride = 1usize;
    for axis in 0..RANK_CAP {
        let out_dim = usize::from(out_shape.at(axis));
        let coord = remaining % out_dim;
        remaining /= out_dim;
        let in_dim = usize::from(shape.at(axis));
        in_idx += (coord % in_dim) * in_stride;
        in_stride *= in_dim;
    }
    data[in_idx]
}

fn unary(op: Opcode, inputs: &[(Shape, Vec<f32>)]) -> Result<Vec<f32>, DeviceError> {
    let (_, data) = &inputs[0];
    let f: fn(f32) -> f32 = match op {
        Opcode::Abs => f32::abs,
        Opcode::Neg => |v| -v,
        Opcode::Sin => f32::sin,
        Opcode::Cos => f32::cos,
        Opcode::Tan => f32::tan,
        Opcode::Exp => f32::exp,
        Opcode::Log => f32::ln,
        Opcode::Sqrt => f32::sqrt,
        Opcode::Round => f32::round,
        _ => return Err(DeviceError::Unsupported { op: op.name() }),
    };
    Ok(data.iter().map(|&v| f(v)).collect())
}

fn elementwise(
    op: Opcode,
    inputs: &[(Shape, Vec<f32>)],
    out_shape: &Shape,
) -> Result<Vec<f32>, DeviceError> {
    let n = out_shape.n_elems() as usize;
    let mut rng = rand::thread_rng();
    let mut out = Vec::with_capacity(n);
    for idx in 0..n {
        let vals: Vec<f32> = inputs
            .iter()
            .map(|(shape, data)| broadcast_read(shape, data, out_shape, idx))
            .collect();
        let result = match op {
            Opcode::Add => vals.iter().sum(),
            Opcode::Mul => vals.iter().product(),
            Opcode::Sub => vals[1..].iter().fold(vals[0], |acc, &v| acc - v),
            Opcode::Div => vals[1..].iter().fold(vals[0], |acc, &v| acc / v),
            Opcode::Pow => vals[1..].iter().fold(vals[0], |acc, &v| acc.powf(v)),
            Opcode::Min => vals.iter().fold(f32::INFINITY, |acc, &v| acc.min(v)),
            Opcode::Max => vals.iter().fold(f32::NEG_INFINITY, |acc, &v| acc.max(v)),
            Opcode::Eq | Opcode::Ne | Opcode::Lt | Opcode::Gt => {
                if vals.len() != 2 {
                    return Err(DeviceError::Kernel(format!(
                        "{} expects 2 inputs, got {}",
                        op.name(),
                        vals.len()
                    )));
                }
                let hit = match op {
                    Opcode::Eq => vals[0] == vals[1],
                    Opcode::Ne => vals[0] != vals[1],
                    Opcode::Lt => vals[0] < vals[1],
                    _ => vals[0] > vals[1],
                };
                if hit {
                    1.0
                } else {
                    0.0
                }
            }
            Opcode::RandUnif => {
                let (low, high) = (vals[0], vals[1]);
                if high > low {
                    rng.gen_range(low..high)
                } else {
                    low
                }
            }
            Opcode::RandNorm => {
                let (mean, stddev) = (vals[0], vals[1]);
                mean + stddev * standard_normal(&mut rng)
            }
            _ => return Err(DeviceError::Unsupported { op: op.name() }),
        };
        out.push(result);
    }
    Ok(out)
}

fn standard_normal(rng: &mut impl Rng) -> f32 {
    // Box-Muller over two uniforms
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

fn reduce(func: &Functor, inputs: &[(Shape, Vec<f32>)]) -> Result<Vec<f32>, DeviceError> {
    let op = func.opcode();
    let dim = func
        .attrs()
        .int(keys::DIM)
        .ok_or_else(|| DeviceError::Kernel("reduction is missing its boundary".into()))?
        as usize;
    let (shape, data) = &inputs[0];
    let folded: usize = shape.dims()[..dim.min(shape.rank())]
        .iter()
        .map(|&d| usize::from(d))
        .product();
    if folded == 0 || data.is_empty() {
        return Err(DeviceError::Kernel("reduction over an empty buffer".into()));
    }
    let outer = data.len() / folded;
    let mut out = Vec::with_capacity(outer);
    for o in 0..outer {
        let chunk = &data[o * folded..(o + 1) * folded];
        let acc = match op {
            Opcode::ReduceSum => chunk.iter().sum(),
            Opcode::ReduceProd => chunk.iter().product(),
            Opcode::ReduceMin => chunk.iter().fold(f32::INFINITY, |a, &v| a.min(v)),
            Opcode::ReduceMax => chunk.iter().fold(f32::NEG_INFINITY, |a, &v| a.max(v)),
            _ => return Err(DeviceError::Unsupported { op: op.name() }),
        };
        out.push(acc);
    }
    Ok(out)
}

fn matmul(func: &Functor, inputs: &[(Shape, Vec<f32>)]) -> Result<Vec<f32>, DeviceError> {
    let agroup = func.attrs().int(keys::AGROUP).unwrap_or(1) as usize;
    let bgroup = func.attrs().int(keys::BGROUP).unwrap_or(1) as usize;
    let (a_shape, a) = &inputs[0];
    let (b_shape, b) = &inputs[1];
    let m: usize = a_shape.dims()[..agroup].iter().map(|&d| usize::from(d)).product();
    let c: usize = a_shape.dims()[agroup..].iter().map(|&d| usize::from(d)).product();
    let n: usize = b_shape.dims()[bgroup..].iter().map(|&d| usize::from(d)).product();
    let mut out = vec![0.0f32; n * m];
    for mi in 0..m {
        for ni in 0..n {
            let mut acc = 0.0f32;
            for ci in 0..c {
                acc += a[mi + m * ci] * b[ci + c * ni];
            }
            out[ni + n * mi] = acc;
        }
    }
    Ok(out)
}

fn permute(
    func: &Functor,
    inputs: &[(Shape, Vec<f32>)],
    out_shape: &Shape,
) -> Result<Vec<f32>, DeviceError> {
    let order = func
        .attrs()
        .int_list(keys::ORDER)
        .ok_or_else(|| DeviceError::Kernel("permute is missing its order".into()))?;
    let (in_shape, data) = &inputs[0];

    // complete the order the same way shape inference does
    let mut seen = [false; RANK_CAP];
    let mut full: Vec<usize> = Vec::with_capacity(RANK_CAP);
    for &axis in order {
        let axis = axis as usize;
        if axis < RANK_CAP && !seen[axis] {
            seen[axis] = true;
            full.push(axis);
        }
    }
    for (axis, taken) in seen.iter().enumerate() {
        if !taken {
            full.push(axis);
        }
    }

    let n = out_shape.n_elems() as usize;
    let mut out = Vec::with_capacity(n);
    let mut in_strides = [0usize; RANK_CAP];
    let mut stride = 1usize;
    for (axis, slot) in in_strides.iter_mut().enumerate() {
        *slot = stride;
        stride *= usize::from(in_shape.at(axis));
    }
    for idx in 0..n {
        let mut remaining = idx;
        let mut src = 0usize;
        for (i, &axis) in full.iter().enumerate() {
            let out_dim = usize::from(out_shape.at(i));
            let coord = remaining % out_dim;
            remaining /= out_dim;
            src += coord * in_strides[axis];
        }
        out.push(data[src]);
    }
    Ok(out)
}

fn extend(inputs: &[(Shape, Vec<f32>)], out_shape: &Shape) -> Vec<f32> {
    let (_, data) = &inputs[0];
    let n = out_shape.n_elems() as usize;
    (0..n).map(|i| data[i % data.len()]).collect()
}

fn reshape(inputs: &[(Shape, Vec<f32>)], out_shape: &Shape) -> Vec<f32> {
    let (_, data) = &inputs[0];
    let n = out_shape.n_elems() as usize;
    if data.len() == n {
        data.clone()
    } else {
        // single-element broadcast source
        vec![data.first().copied().unwrap_or(0.0); n]
    }
}
