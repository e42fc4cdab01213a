use super::compiler::{BinOp, Expr, KernelDef, ParamKind, ScalarType, Stmt, UnOp};

/// Argument value after binding, as seen by the executor.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Bound {
    Scalar(i64),
    /// Index into the launch's memory table.
    Memory(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Fault {
    OutOfBounds { lane: usize, param: String, index: i64 },
    DivisionByZero { lane: usize },
}

enum Flow {
    Next,
    Return,
}

struct Lane<'a> {
    gid: usize,
    global: usize,
    frame: &'a mut [i64],
    args: &'a [Bound],
    memory: &'a mut [Vec<i32>],
    kernel: &'a KernelDef,
}

/// Run every lane of a one-dimensional launch in index order.
pub(crate) fn run(
    kernel: &KernelDef,
    args: &[Bound],
    memory: &mut [Vec<i32>],
    global: usize,
) -> Result<(), Fault> {
    let mut initial = vec![0i64; kernel.frame_size];
    for (param, bound) in kernel.params.iter().zip(args) {
        if let (ParamKind::Scalar { ty, slot }, Bound::Scalar(v)) = (param.kind, bound) {
            initial[slot] = ty.wrap(*v);
        }
    }

    let mut frame = initial.clone();
    for gid in 0..global {
        frame.copy_from_slice(&initial);
        let mut lane = Lane {
            gid,
            global,
            frame: &mut frame,
            args,
            memory: &mut *memory,
            kernel,
        };
        lane.block(&kernel.body)?;
    }
    Ok(())
}

impl Lane<'_> {
    fn block(&mut self, stmts: &[Stmt]) -> Result<Flow, Fault> {
        for stmt in stmts {
            if let Flow::Return = self.stmt(stmt)? {
                return Ok(Flow::Return);
            }
        }
        Ok(Flow::Next)
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<Flow, Fault> {
        match stmt {
            Stmt::Assign { slot, ty, value } => {
                let v = self.eval(value)?;
                self.frame[*slot] = ty.wrap(v);
            }
            Stmt::Store { param, elem, index, value } => {
                let i = self.eval(index)?;
                let v = self.eval(value)?;
                let at = self.element(*param, i)?;
                let mem = self.memory_of(*param);
                self.memory[mem][at] = elem.wrap(v) as i32;
            }
            Stmt::If { cond, then, otherwise } => {
                if self.eval(cond)? != 0 {
                    return self.stmt(then);
                } else if let Some(otherwise) = otherwise {
                    return self.stmt(otherwise);
                }
            }
            Stmt::Block(stmts) => return self.block(stmts),
            Stmt::Return => return Ok(Flow::Return),
        }
        Ok(Flow::Next)
    }

    fn memory_of(&self, param: usize) -> usize {
        match self.args[param] {
            Bound::Memory(m) => m,
            // binding checks guarantee pointer params carry memory
            Bound::Scalar(_) => unreachable!("pointer parameter bound to a scalar"),
        }
    }

    fn element(&self, param: usize, index: i64) -> Result<usize, Fault> {
        let len = self.memory[self.memory_of(param)].len();
        usize::try_from(index)
            .ok()
            .filter(|&i| i < len)
            .ok_or_else(|| Fault::OutOfBounds {
                lane: self.gid,
                param: self.kernel.params[param].name.clone(),
                index,
            })
    }

    fn eval(&mut self, expr: &Expr) -> Result<i64, Fault> {
        Ok(match expr {
            Expr::Const(v, _) => *v,
            Expr::Var { slot, .. } => self.frame[*slot],
            Expr::Load { param, elem, index } => {
                let i = self.eval(index)?;
                let at = self.element(*param, i)?;
                elem.wrap(self.memory[self.memory_of(*param)][at] as i64)
            }
            Expr::GlobalId(dim) => match self.eval(dim)? {
                0 => self.gid as i64,
                _ => 0,
            },
            Expr::GlobalSize(dim) => match self.eval(dim)? {
                0 => self.global as i64,
                _ => 1,
            },
            Expr::Cast(ty, e) => ty.wrap(self.eval(e)?),
            Expr::Unary(op, ty, e) => {
                let v = ty.wrap(self.eval(e)?);
                match op {
                    UnOp::Neg => ty.wrap(v.wrapping_neg()),
                    UnOp::Not => (v == 0) as i64,
                    UnOp::BitNot => ty.wrap(!v),
                }
            }
            Expr::Binary(BinOp::And, _, l, r) => (self.eval(l)? != 0 && self.eval(r)? != 0) as i64,
            Expr::Binary(BinOp::Or, _, l, r) => (self.eval(l)? != 0 || self.eval(r)? != 0) as i64,
            Expr::Binary(op, ty, l, r) => {
                let (a, b) = (self.eval(l)?, self.eval(r)?);
                binary(*op, *ty, a, b).ok_or(Fault::DivisionByZero { lane: self.gid })?
            }
        })
    }
}

/// `op` on operands converted to `ty`, truncated back to `ty`. Shift
/// counts are taken modulo the width of `ty`. `None` on division by zero.
fn binary(op: BinOp, ty: ScalarType, a: i64, b: i64) -> Option<i64> {
    let a = ty.wrap(a);
    if let BinOp::Shl | BinOp::Shr = op {
        let n = (b as u32) & (ty.size() as u32 * 8 - 1);
        return Some(ty.wrap(match (op, ty) {
            (BinOp::Shl, _) => a.wrapping_shl(n),
            (_, ScalarType::Size) => ((a as u64) >> n) as i64,
            _ => a >> n,
        }));
    }

    let b = ty.wrap(b);
    // size_t is the only type whose values don't all fit a non-negative i64
    let unsigned = ty == ScalarType::Size;
    let ord = if unsigned { (a as u64).cmp(&(b as u64)) } else { a.cmp(&b) };
    Some(match op {
        BinOp::Add => ty.wrap(a.wrapping_add(b)),
        BinOp::Sub => ty.wrap(a.wrapping_sub(b)),
        BinOp::Mul => ty.wrap(a.wrapping_mul(b)),
        BinOp::Div | BinOp::Rem if b == 0 => return None,
        BinOp::Div if unsigned => ((a as u64) / (b as u64)) as i64,
        BinOp::Rem if unsigned => ((a as u64) % (b as u64)) as i64,
        BinOp::Div => ty.wrap(a.wrapping_div(b)),
        BinOp::Rem => ty.wrap(a.wrapping_rem(b)),
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
        BinOp::Eq => ord.is_eq() as i64,
        BinOp::Ne => ord.is_ne() as i64,
        BinOp::Lt => ord.is_lt() as i64,
        BinOp::Gt => ord.is_gt() as i64,
        BinOp::Le => ord.is_le() as i64,
        BinOp::Ge => ord.is_ge() as i64,
        BinOp::And => (a != 0 && b != 0) as i64,
        BinOp::Or => (a != 0 || b != 0) as i64,
        BinOp::Shl | BinOp::Shr => unreachable!("shifts handled above"),
    })
}

#[cfg(test)]
mod tests {
    use super::super::compiler::compile;
    use super::*;

    fn run_src(src: &str, args: &[Bound], memory: &mut [Vec<i32>], global: usize) -> Result<(), Fault> {
        let module = compile(src).module.expect("kernel should compile");
        run(&module.kernels[0], args, memory, global)
    }

    #[test]
    fn adds_elementwise() {
        let src = "__kernel void add(const int n, __global int* a, __global int* b, __global int* c) {
            int i = get_global_id(0);
            if (i < n) c[i] = a[i] + b[i];
        }";
        let mut memory = vec![vec![1, 2, 3, 4], vec![10, 20, 30, 40], vec![0; 4]];
        let args = [Bound::Scalar(4), Bound::Memory(0), Bound::Memory(1), Bound::Memory(2)];
        run_src(src, &args, &mut memory, 4).unwrap();
        assert_eq!(memory[2], vec![11, 22, 33, 44]);
    }

    #[test]
    fn guard_and_return_limit_lanes() {
        let src = "__kernel void k(int n, __global int* out) {
            size_t i = get_global_id(0);
            if (i >= n) { return; }
            out[i] += 5;
        }";
        let mut memory = vec![vec![1; 6]];
        run_src(src, &[Bound::Scalar(3), Bound::Memory(0)], &mut memory, 6).unwrap();
        assert_eq!(memory[0], vec![6, 6, 6, 1, 1, 1]);
    }

    #[test]
    fn out_of_bounds_faults() {
        let src = "__kernel void k(__global int* out) { out[get_global_id(0) + 1] = 1; }";
        let mut memory = vec![vec![0; 2]];
        let err = run_src(src, &[Bound::Memory(0)], &mut memory, 2).unwrap_err();
        assert_eq!(err, Fault::OutOfBounds { lane: 1, param: "out".into(), index: 2 });
    }

    #[test]
    fn division_by_zero_faults() {
        let src = "__kernel void k(__global int* out) { out[0] = 1 / out[0]; }";
        let mut memory = vec![vec![0]];
        let err = run_src(src, &[Bound::Memory(0)], &mut memory, 1).unwrap_err();
        assert_eq!(err, Fault::DivisionByZero { lane: 0 });
    }

    #[test]
    fn int_stores_wrap() {
        let src = "__kernel void k(__global int* out) { out[0] = out[0] + 1; }";
        let mut memory = vec![vec![i32::MAX]];
        run_src(src, &[Bound::Memory(0)], &mut memory, 1).unwrap();
        assert_eq!(memory[0], vec![i32::MIN]);
    }

    #[test]
    fn arithmetic_follows_operand_types() {
        let src = "__kernel void k(__global int* out, __global uint* u) {
            uint zero = 0;
            out[0] = -1 < zero;
            out[1] = (zero - 1) / 2;
            out[2] = get_global_id(0) > -1;
            out[3] = 1 << 33;
            out[4] = -7 / 2;
            u[0] = ~0u >> 28;
        }";
        let mut memory = vec![vec![9; 5], vec![0]];
        run_src(src, &[Bound::Memory(0), Bound::Memory(1)], &mut memory, 1).unwrap();
        // -1 converts to UINT_MAX and SIZE_MAX before comparing
        assert_eq!(memory[0], vec![0, i32::MAX, 0, 2, -3]);
        assert_eq!(memory[1], vec![15]);
    }

    #[test]
    fn size_t_division_is_unsigned() {
        assert_eq!(binary(BinOp::Div, ScalarType::Size, -2, 2), Some(i64::MAX));
        assert_eq!(binary(BinOp::Shr, ScalarType::Int, -8, 1), Some(-4));
        assert_eq!(binary(BinOp::Rem, ScalarType::UInt, 5, 0), None);
    }
}
