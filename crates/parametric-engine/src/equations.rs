//! Residual equations and their analytic first derivatives.
//!
//! Every constraint lowers to one or two scalar equations over the flat
//! parameter vector. A point term is either stored directly (two slots) or
//! derived from an arc's center, radius and one angle; the chain rule for
//! the derived case lives in [`PointExpr::accumulate`] so each equation only
//! reasons about d/d(px) and d/d(py).
//!
//! Derivatives accumulate with `+=`. When one curve appears on both sides of
//! an equation the slot sets overlap and the contributions must add.

/// A point term in an equation, resolved to parameter slots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum PointExpr {
    /// Point stored directly in the parameter vector.
    Stored { x: usize, y: usize },
    /// Arc endpoint: (cx + r cos theta, cy + r sin theta).
    ArcEndpoint {
        cx: usize,
        cy: usize,
        r: usize,
        theta: usize,
    },
}

impl PointExpr {
    pub(crate) fn eval(self, params: &[f64]) -> (f64, f64) {
        match self {
            PointExpr::Stored { x, y } => (params[x], params[y]),
            PointExpr::ArcEndpoint { cx, cy, r, theta } => {
                let (sin, cos) = params[theta].sin_cos();
                (params[cx] + params[r] * cos, params[cy] + params[r] * sin)
            }
        }
    }

    /// Add d(wx * px + wy * py)/dparams into `row`.
    pub(crate) fn accumulate(self, params: &[f64], wx: f64, wy: f64, row: &mut [f64]) {
        match self {
            PointExpr::Stored { x, y } => {
                row[x] += wx;
                row[y] += wy;
            }
            PointExpr::ArcEndpoint { cx, cy, r, theta } => {
                let (sin, cos) = params[theta].sin_cos();
                row[cx] += wx;
                row[cy] += wy;
                row[r] += wx * cos + wy * sin;
                row[theta] += params[r] * (wy * cos - wx * sin);
            }
        }
    }
}

/// The four slots of a line: start xy, end xy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct LineSlots {
    pub ax: usize,
    pub ay: usize,
    pub bx: usize,
    pub by: usize,
}

impl LineSlots {
    fn direction(self, params: &[f64]) -> (f64, f64) {
        (
            params[self.bx] - params[self.ax],
            params[self.by] - params[self.ay],
        )
    }
}

/// One scalar equation of the compiled system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Equation {
    /// x components of two points match.
    MatchX { a: PointExpr, b: PointExpr },
    /// y components of two points match.
    MatchY { a: PointExpr, b: PointExpr },
    /// Dot product of two line directions is zero.
    Perpendicular { a: LineSlots, b: LineSlots },
    /// Cross product of two line directions is zero.
    Parallel { a: LineSlots, b: LineSlots },
    /// Two scalar slots match (equal radii).
    ScalarMatch { a: usize, b: usize },
    /// Line direction is orthogonal to the arc radius vector at the endpoint
    /// parameterized by `theta`.
    TangentAt {
        line: LineSlots,
        radius: usize,
        theta: usize,
    },
    /// Point lies on the infinite carrier of a line: cross of (p - a) and d.
    OnLine { p: PointExpr, line: LineSlots },
    /// Point lies on the circle carrying an arc, in squared form.
    OnCircle {
        p: PointExpr,
        cx: usize,
        cy: usize,
        r: usize,
    },
}

impl Equation {
    pub(crate) fn residual(&self, params: &[f64]) -> f64 {
        match *self {
            Equation::MatchX { a, b } => a.eval(params).0 - b.eval(params).0,
            Equation::MatchY { a, b } => a.eval(params).1 - b.eval(params).1,
            Equation::Perpendicular { a, b } => {
                let (d1x, d1y) = a.direction(params);
                let (d2x, d2y) = b.direction(params);
                d1x * d2x + d1y * d2y
            }
            Equation::Parallel { a, b } => {
                let (d1x, d1y) = a.direction(params);
                let (d2x, d2y) = b.direction(params);
                d1x * d2y - d1y * d2x
            }
            Equation::ScalarMatch { a, b } => params[a] - params[b],
            Equation::TangentAt {
                line,
                radius,
                theta,
            } => {
                let (dx, dy) = line.direction(params);
                let (sin, cos) = params[theta].sin_cos();
                params[radius] * (dx * cos + dy * sin)
            }
            Equation::OnLine { p, line } => {
                let (dx, dy) = line.direction(params);
                let (px, py) = p.eval(params);
                (px - params[line.ax]) * dy - (py - params[line.ay]) * dx
            }
            Equation::OnCircle { p, cx, cy, r } => {
                let (px, py) = p.eval(params);
                let u = px - params[cx];
                let v = py - params[cy];
                u * u + v * v - params[r] * params[r]
            }
        }
    }

    /// Write dR/dparams into `row` (full parameter width, zeroed by caller).
    pub(crate) fn derivatives(&self, params: &[f64], row: &mut [f64]) {
        match *self {
            Equation::MatchX { a, b } => {
                a.accumulate(params, 1.0, 0.0, row);
                b.accumulate(params, -1.0, 0.0, row);
            }
            Equation::MatchY { a, b } => {
                a.accumulate(params, 0.0, 1.0, row);
                b.accumulate(params, 0.0, -1.0, row);
            }
            Equation::Perpendicular { a, b } => {
                let (d1x, d1y) = a.direction(params);
                let (d2x, d2y) = b.direction(params);
                row[a.bx] += d2x;
                row[a.ax] -= d2x;
                row[a.by] += d2y;
                row[a.ay] -= d2y;
                row[b.bx] += d1x;
                row[b.ax] -= d1x;
                row[b.by] += d1y;
                row[b.ay] -= d1y;
            }
            Equation::Parallel { a, b } => {
                let (d1x, d1y) = a.direction(params);
                let (d2x, d2y) = b.direction(params);
                row[a.bx] += d2y;
                row[a.ax] -= d2y;
                row[a.by] -= d2x;
                row[a.ay] += d2x;
                row[b.by] += d1x;
                row[b.ay] -= d1x;
                row[b.bx] -= d1y;
                row[b.ax] += d1y;
            }
            Equation::ScalarMatch { a, b } => {
                row[a] += 1.0;
                row[b] -= 1.0;
            }
            Equation::TangentAt {
                line,
                radius,
                theta,
            } => {
                let (dx, dy) = line.direction(params);
                let (sin, cos) = params[theta].sin_cos();
                let r = params[radius];
                row[line.bx] += r * cos;
                row[line.ax] -= r * cos;
                row[line.by] += r * sin;
                row[line.ay] -= r * sin;
                row[radius] += dx * cos + dy * sin;
                row[theta] += r * (dy * cos - dx * sin);
            }
            Equation::OnLine { p, line } => {
                let (dx, dy) = line.direction(params);
                let (px, py) = p.eval(params);
                let u = px - params[line.ax];
                let v = py - params[line.ay];
                p.accumulate(params, dy, -dx, row);
                row[line.ax] += v - dy;
                row[line.ay] += dx - u;
                row[line.bx] -= v;
                row[line.by] += u;
            }
            Equation::OnCircle { p, cx, cy, r } => {
                let (px, py) = p.eval(params);
                let u = px - params[cx];
                let v = py - params[cy];
                p.accumulate(params, 2.0 * u, 2.0 * v, row);
                row[cx] -= 2.0 * u;
                row[cy] -= 2.0 * v;
                row[r] -= 2.0 * params[r];
            }
        }
    }
}
