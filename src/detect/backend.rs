use anyhow::{anyhow, Result};

/// Planar `[1, 3, size, size]` float tensor, values in [0,1].
#[derive(Clone, Debug, PartialEq)]
pub struct InputTensor {
    pub size: u32,
    pub data: Vec<f32>,
}

impl InputTensor {
    pub fn shape(&self) -> [usize; 4] {
        let s = self.size as usize;
        [1, 3, s, s]
    }
}

/// Raw model output: dimensions plus row-major (C order) values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OutputTensor {
    pub dims: Vec<usize>,
    pub data: Vec<f32>,
}

impl OutputTensor {
    pub fn new(dims: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = dims.iter().product();
        if expected != data.len() {
            return Err(anyhow!(
                "output tensor dims {:?} need {} values, got {}",
                dims,
                expected,
                data.len()
            ));
        }
        Ok(Self { dims, data })
    }

    /// `[1, rows, attrs]` tensor, or its transpose `[1, attrs, rows]` when
    /// `attributes_first` is set. All rows must have the same length.
    pub fn from_rows(rows: &[Vec<f32>], attributes_first: bool) -> Result<Self> {
        let attrs = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.iter().any(|r| r.len() != attrs) {
            return Err(anyhow!("candidate rows have uneven lengths"));
        }
        if !attributes_first {
            let data = rows.iter().flatten().copied().collect();
            return Self::new(vec![1, rows.len(), attrs], data);
        }
        let mut data = Vec::with_capacity(rows.len() * attrs);
        for a in 0..attrs {
            for row in rows {
                data.push(row[a]);
            }
        }
        Self::new(vec![1, attrs, rows.len()], data)
    }
}

/// Object-detection model backend.
///
/// Implementations must treat the input as read-only and must not retain it
/// beyond the call. The compute backend is an implementation detail; results
/// must agree across backends within floating-point tolerance.
pub trait ObjectModel: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run one inference.
    fn infer(&mut self, input: &InputTensor) -> Result<OutputTensor>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
