//! Translators populate claimed slots in place.
//!
//! The convenience publish paths on [`EventExchange`](crate::EventExchange)
//! claim a sequence, hand the pre-allocated slot to a translator, and
//! publish - the caller never touches sequencing directly.

/// Write data into an event that already lives in the ring.
pub trait EventTranslator<T>: Send + Sync {
    /// Populate `event`, which has been claimed at `sequence`.
    fn translate_to(&self, event: &mut T, sequence: i64);
}

/// Translator carrying one argument.
pub trait EventTranslatorOneArg<T, A>: Send + Sync {
    fn translate_to(&self, event: &mut T, sequence: i64, arg: A);
}

/// Translator carrying two arguments.
pub trait EventTranslatorTwoArg<T, A, B>: Send + Sync {
    fn translate_to(&self, event: &mut T, sequence: i64, arg0: A, arg1: B);
}

/// Translator backed by a closure.
pub struct ClosureEventTranslator<T, F>
where
    F: Fn(&mut T, i64) + Send + Sync,
{
    translator_fn: F,
    _marker: std::marker::PhantomData<fn(&mut T)>,
}

impl<T, F> ClosureEventTranslator<T, F>
where
    F: Fn(&mut T, i64) + Send + Sync,
{
    pub fn new(translator_fn: F) -> Self {
        Self {
            translator_fn,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T, F> EventTranslator<T> for ClosureEventTranslator<T, F>
where
    F: Fn(&mut T, i64) + Send + Sync,
{
    fn translate_to(&self, event: &mut T, sequence: i64) {
        (self.translator_fn)(event, sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Tick {
        price: i64,
        sequence: i64,
    }

    struct PriceTranslator {
        price: i64,
    }

    impl EventTranslator<Tick> for PriceTranslator {
        fn translate_to(&self, event: &mut Tick, sequence: i64) {
            event.price = self.price;
            event.sequence = sequence;
        }
    }

    #[test]
    fn test_translator_populates_in_place() {
        let translator = PriceTranslator { price: 250 };
        let mut event = Tick::default();
        translator.translate_to(&mut event, 7);
        assert_eq!(event.price, 250);
        assert_eq!(event.sequence, 7);
    }

    #[test]
    fn test_closure_translator() {
        let translator = ClosureEventTranslator::new(|event: &mut Tick, sequence| {
            event.price = sequence * 2;
        });
        let mut event = Tick::default();
        translator.translate_to(&mut event, 21);
        assert_eq!(event.price, 42);
    }
}
